use dwlower::prelude::DwResult;
use dwlower::{cli, dw_retype};

fn main() -> DwResult<()> {
    let args = cli::retype().get_matches();
    dw_retype::run(&args)
}
