use dwlower::prelude::DwResult;
use dwlower::{cli, dw_lower};

fn main() -> DwResult<()> {
    let args = cli::lower().get_matches();
    dw_lower::run(&args)
}
