#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(bodies) = dw_ir::parse(data) {
        for mut body in bodies {
            if dw_analysis::retype(&mut body).is_ok() {
                let _ = dw_codegen::lower(&mut body);
            }
        }
    }
});
