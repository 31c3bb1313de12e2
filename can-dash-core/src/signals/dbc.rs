//! DBC file parser
//!
//! Parses Vector DBC files with the `can-dbc` crate and converts them into
//! the internal message/signal definitions.

use crate::signals::database::{
    ByteOrder, MessageDefinition, MultiplexerInfo, SignalDefinition, ValueType,
};
use crate::types::{DashError, Result};
use std::path::Path;

/// Bit 31 marks an extended (29-bit) identifier in DBC files
const DBC_EXTENDED_FLAG: u32 = 0x8000_0000;

/// Parse a DBC file and return message definitions in file order
pub fn parse_dbc_file(path: &Path) -> Result<Vec<MessageDefinition>> {
    log::debug!("Reading DBC {:?}", path);

    let bytes = std::fs::read(path).map_err(|e| {
        DashError::DatabaseLoadError(format!("Failed to read file {:?}: {}", path, e))
    })?;

    parse_dbc_bytes(bytes).map_err(|e| match e {
        DashError::DatabaseLoadError(msg) => {
            DashError::DatabaseLoadError(format!("{:?}: {}", path, msg))
        }
        other => other,
    })
}

/// Parse DBC content held in memory
pub fn parse_dbc_bytes(bytes: Vec<u8>) -> Result<Vec<MessageDefinition>> {
    // Windows tools often write DBC files in Latin-1
    let dbc_content = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("DBC content is not valid UTF-8, decoding as Latin-1");
            e.into_bytes().iter().map(|&b| b as char).collect()
        }
    };

    let dbc = can_dbc::DBC::from_slice(dbc_content.as_bytes())
        .map_err(|e| DashError::DatabaseLoadError(format!("Malformed DBC: {:?}", e)))?;

    let messages = dbc
        .messages()
        .iter()
        .map(convert_message)
        .collect::<Result<Vec<_>>>()?;
    log::debug!("{} message definitions", messages.len());
    Ok(messages)
}

impl From<&can_dbc::ByteOrder> for ByteOrder {
    fn from(order: &can_dbc::ByteOrder) -> Self {
        match order {
            can_dbc::ByteOrder::LittleEndian => ByteOrder::LittleEndian,
            can_dbc::ByteOrder::BigEndian => ByteOrder::BigEndian,
        }
    }
}

impl From<&can_dbc::ValueType> for ValueType {
    fn from(kind: &can_dbc::ValueType) -> Self {
        match kind {
            can_dbc::ValueType::Signed => ValueType::Signed,
            can_dbc::ValueType::Unsigned => ValueType::Unsigned,
        }
    }
}

/// The message's top-level switch: the plain `M` signal, else the first `mNM`
fn switch_signal(msg: &can_dbc::Message) -> Option<&str> {
    let signals = msg.signals();
    signals
        .iter()
        .find(|sig| matches!(sig.multiplexer_indicator(), can_dbc::MultiplexIndicator::Multiplexor))
        .or_else(|| {
            signals.iter().find(|sig| {
                matches!(
                    sig.multiplexer_indicator(),
                    can_dbc::MultiplexIndicator::MultiplexorAndMultiplexedSignal(_)
                )
            })
        })
        .map(|sig| sig.name().as_str())
}

fn convert_message(msg: &can_dbc::Message) -> Result<MessageDefinition> {
    let switch = switch_signal(msg);
    let is_multiplexed = msg
        .signals()
        .iter()
        .any(|sig| !matches!(sig.multiplexer_indicator(), can_dbc::MultiplexIndicator::Plain));

    let signals = msg
        .signals()
        .iter()
        .map(|sig| convert_signal(sig, switch))
        .collect::<Result<Vec<_>>>()?;

    let sender = match msg.transmitter() {
        can_dbc::Transmitter::NodeName(node) => Some(node.clone()),
        _ => None,
    };

    Ok(MessageDefinition {
        id: msg.message_id().0 & !DBC_EXTENDED_FLAG,
        name: msg.message_name().clone(),
        size: *msg.message_size() as usize,
        sender,
        signals,
        is_multiplexed,
        multiplexer_signal: switch.map(str::to_owned),
    })
}

fn convert_signal(sig: &can_dbc::Signal, switch: Option<&str>) -> Result<SignalDefinition> {
    let multiplexer_info = match sig.multiplexer_indicator() {
        // An `mNM` signal that is itself the top-level switch is always present
        can_dbc::MultiplexIndicator::MultiplexorAndMultiplexedSignal(_)
            if Some(sig.name().as_str()) == switch =>
        {
            None
        }
        can_dbc::MultiplexIndicator::MultiplexedSignal(value)
        | can_dbc::MultiplexIndicator::MultiplexorAndMultiplexedSignal(value) => {
            let Some(switch) = switch else {
                return Err(DashError::DatabaseLoadError(format!(
                    "Signal '{}' is multiplexed but its message has no switch signal",
                    sig.name()
                )));
            };
            Some(MultiplexerInfo {
                multiplexer_signal: switch.to_owned(),
                multiplexer_values: vec![*value],
            })
        }
        _ => None,
    };

    let unit = sig.unit();
    Ok(SignalDefinition {
        name: sig.name().clone(),
        start_bit: *sig.start_bit() as u16,
        length: *sig.signal_size() as u16,
        byte_order: sig.byte_order().into(),
        value_type: sig.value_type().into(),
        factor: *sig.factor(),
        offset: *sig.offset(),
        min: *sig.min(),
        max: *sig.max(),
        unit: (!unit.is_empty()).then(|| unit.clone()),
        multiplexer_info,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::message_decoder::MessageDecoder;
    use std::io::Write;
    use tempfile::NamedTempFile;

    pub(crate) const ENGINE_DBC: &str = r#"
VERSION ""

NS_ :
    NS_DESC_
    CM_
    BA_DEF_
    BA_
    VAL_

BS_:

BU_: ECU1 ECU2

BO_ 256 Engine: 2 ECU1
 SG_ RPM : 8|8@1+ (1,0) [0|255] "rpm" ECU2

BO_ 512 Brake: 8 ECU1
 SG_ Pressure : 0|16@1+ (0.1,0) [0|6553.5] "bar" ECU2
 SG_ Temp : 16|8@1- (1,-40) [-40|215] "C" ECU2
"#;

    pub(crate) fn write_dbc(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    #[test]
    fn test_parse_simple_dbc() {
        let temp_file = write_dbc(ENGINE_DBC);
        let messages = parse_dbc_file(temp_file.path()).unwrap();

        assert_eq!(messages.len(), 2);

        let engine = &messages[0];
        assert_eq!(engine.id, 0x100);
        assert_eq!(engine.name, "Engine");
        assert_eq!(engine.size, 2);
        assert_eq!(engine.sender, Some("ECU1".to_string()));
        assert_eq!(engine.signals.len(), 1);

        let rpm = &engine.signals[0];
        assert_eq!(rpm.name, "RPM");
        assert_eq!(rpm.start_bit, 8);
        assert_eq!(rpm.length, 8);
        assert_eq!(rpm.byte_order, ByteOrder::LittleEndian);
        assert_eq!(rpm.unit, Some("rpm".to_string()));

        let temp = &messages[1].signals[1];
        assert_eq!(temp.value_type, ValueType::Signed);
        assert_eq!(temp.offset, -40.0);
    }

    #[test]
    fn test_parse_multiplexed_signals() {
        let dbc_content = r#"
VERSION ""

NS_ :

BS_:

BU_: ECU1

BO_ 512 DiagPage: 8 ECU1
 SG_ Page M : 0|8@1+ (1,0) [0|3] "" ECU1
 SG_ BatteryPct m0 : 8|16@1+ (1,0) [0|100] "%" ECU1
 SG_ CellMillivolts m1 : 8|16@1+ (0.1,0) [0|1000] "mV" ECU1
"#;

        let temp_file = write_dbc(dbc_content);
        let messages = parse_dbc_file(temp_file.path()).unwrap();

        assert_eq!(messages.len(), 1);
        let msg = &messages[0];
        assert!(msg.is_multiplexed);
        assert_eq!(msg.multiplexer_signal, Some("Page".to_string()));

        let cell = msg.signals.iter().find(|s| s.name == "CellMillivolts").unwrap();
        let mux = cell.multiplexer_info.as_ref().unwrap();
        assert_eq!(mux.multiplexer_signal, "Page");
        assert_eq!(mux.multiplexer_values, vec![1]);
    }

    #[test]
    fn test_nested_switch_is_gated_by_top_level_switch() {
        let dbc_content = r#"
VERSION ""

NS_ :

BS_:

BU_: ECU1

BO_ 768 ServiceData: 8 ECU1
 SG_ Service m1M : 8|8@1+ (1,0) [0|255] "" ECU1
 SG_ Mode M : 0|8@1+ (1,0) [0|3] "" ECU1
 SG_ Voltage m0 : 8|8@1+ (1,0) [0|255] "V" ECU1
"#;

        let temp_file = write_dbc(dbc_content);
        let messages = parse_dbc_file(temp_file.path()).unwrap();
        let msg = &messages[0];
        assert_eq!(msg.multiplexer_signal.as_deref(), Some("Mode"));

        let service = msg.signals.iter().find(|s| s.name == "Service").unwrap();
        let gate = service.multiplexer_info.as_ref().unwrap();
        assert_eq!(gate.multiplexer_signal, "Mode");
        assert_eq!(gate.multiplexer_values, vec![1]);

        let mode0 = MessageDecoder::decode(msg, &[0x00, 0x05]).unwrap();
        assert_eq!(mode0, vec![("Mode", 0.0), ("Voltage", 5.0)]);

        let mode1 = MessageDecoder::decode(msg, &[0x01, 0x05]).unwrap();
        assert_eq!(mode1, vec![("Service", 5.0), ("Mode", 1.0)]);
    }

    #[test]
    fn test_extended_identifier_flag_stripped() {
        let dbc_content = r#"
VERSION ""

NS_ :

BS_:

BU_: ECU1

BO_ 2566844926 J1939Msg: 8 ECU1
 SG_ Value : 0|8@1+ (1,0) [0|255] "" ECU1
"#;

        let temp_file = write_dbc(dbc_content);
        let messages = parse_dbc_file(temp_file.path()).unwrap();
        assert_eq!(messages[0].id, 2566844926 & 0x1FFF_FFFF);
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let result = parse_dbc_file(Path::new("/nonexistent/definitely_missing.dbc"));
        assert!(matches!(result, Err(DashError::DatabaseLoadError(_))));
    }
}
