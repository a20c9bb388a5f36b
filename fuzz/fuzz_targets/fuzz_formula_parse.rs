#![no_main]

use libfuzzer_sys::fuzz_target;
use sp_formula::{FormulaSet, tokenize};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    for (idx, line) in text.lines().enumerate() {
        let first = tokenize(line, idx + 1);
        assert_eq!(first, tokenize(line, idx + 1), "tokenize must be deterministic");
    }
    if let Ok(set) = FormulaSet::parse(text) {
        assert_eq!(set.evaluation_order().count(), set.len());
    }
});
