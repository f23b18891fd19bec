use jflow::prelude::JfResult;
use jflow::{cli, jf_cfg};

fn main() -> JfResult<()> {
    let args = cli::cfg().get_matches();
    jf_cfg::run(&args)
}
