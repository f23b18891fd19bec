use jflow::prelude::JfResult;
use jflow::{cli, jf_dataflow};

fn main() -> JfResult<()> {
    let args = cli::dataflow().get_matches();
    jf_dataflow::run(&args)
}
