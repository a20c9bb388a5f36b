#![no_main]

use libfuzzer_sys::fuzz_target;
use sp_io::{read_table_csv_str, write_table_csv_string};
use sp_types::DataTypeClass;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(table) = read_table_csv_str(text, DataTypeClass::Raw) {
        let _ = write_table_csv_string(&table);
    }
});
