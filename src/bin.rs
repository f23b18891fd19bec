use clap::ArgMatches;
use clap_complete::{generate, Shell};
use jflow::prelude::*;
use jflow::{cli, jf_cfg, jf_dataflow};
use std::io;

fn main() -> JfResult<()> {
    let args = cli::jflow().get_matches();

    match &args.subcommand() {
        Some(("cfg", cmd_args)) => jf_cfg::run(cmd_args),
        Some(("dataflow", cmd_args)) => jf_dataflow::run(cmd_args),
        Some(("gen-completions", sub_args)) => subcommand_gen_completions(sub_args),
        Some((subcommand, _)) => Err(JfError::BadArguments(format!(
            "unknown subcommand '{subcommand}'"
        ))),
        None => Err(JfError::BadArguments("missing subcommand".to_string())),
    }
}

fn subcommand_gen_completions(sub_args: &ArgMatches) -> JfResult<()> {
    let generator = *sub_args
        .get_one::<Shell>("shell")
        .ok_or_else(|| JfError::BadArguments("--shell needed".to_string()))?;
    let mut cmd = cli::jflow();
    let cmd_name = cmd.get_name().to_string();
    generate(generator, &mut cmd, cmd_name, &mut io::stdout());
    Ok(())
}
