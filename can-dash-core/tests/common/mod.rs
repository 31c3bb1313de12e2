//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::io::Write;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

const DBC_HEADER: &str = r#"
VERSION ""

NS_ :
    NS_DESC_
    CM_
    BA_DEF_
    BA_
    VAL_

BS_:

BU_: ECU1 ECU2
"#;

/// Engine 0x100 with an 8-bit RPM signal in its second byte
pub const ENGINE_MESSAGES: &str = r#"
BO_ 256 Engine: 2 ECU1
 SG_ RPM : 8|8@1+ (1,0) [0|255] "rpm" ECU2
"#;

/// Two layouts for identifier 0x100 with disjoint message and signal names
pub const ALPHA_MESSAGES: &str = r#"
BO_ 256 Alpha: 3 ECU1
 SG_ A1 : 0|8@1+ (1,0) [0|255] "" ECU2
 SG_ A2 : 8|8@1+ (1,0) [0|255] "" ECU2
"#;

pub const BETA_MESSAGES: &str = r#"
BO_ 256 Beta: 3 ECU1
 SG_ B1 : 0|8@1+ (1,0) [0|255] "" ECU2
 SG_ B2 : 8|8@1+ (1,0) [0|255] "" ECU2
 SG_ B3 : 16|8@1+ (1,0) [0|255] "" ECU2
"#;

/// Write a DBC file containing `messages` after a standard header
pub fn write_dbc(messages: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(DBC_HEADER.as_bytes()).unwrap();
    temp_file.write_all(messages.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

/// Route library logs to the test harness; safe to call from every test
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Poll `condition` until it holds or five seconds pass
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}
