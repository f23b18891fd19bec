use crate::prelude::*;
use clap::ArgMatches;
use std::fs::{create_dir_all, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn run(args: &ArgMatches) -> JfResult<()> {
    init_logger(args);

    let (program, hierarchy) = load_program(args)?;
    let raw = args.get_flag("raw");
    let mut nb_edges = 0;

    for method in filtered_methods(&program, args)? {
        let cache = MethodAnalysisCache::new(
            method,
            &hierarchy,
            &LogLookupFailures,
            DataflowConfig::new(),
        );
        let cfg = if raw { cache.raw_cfg()? } else { cache.cfg()? };
        log::debug!(
            "{}: {} basic blocks, {} edges",
            method.full_name(),
            cfg.num_basic_blocks(),
            cfg.num_edges()
        );
        nb_edges += cfg.num_edges();

        if let Some(cfg_dir) = args.get_one::<String>("output") {
            let fname = write_cfg_file(cfg_dir, method, &cfg)?;
            log::info!("{} written in {fname:?}", method.full_name());
        } else {
            println!("{cfg}");
        }
    }
    log::info!("{nb_edges} edges in total");

    Ok(())
}

// Method names and descriptors contain characters unfit for file names.
fn file_stem(method: &Method) -> String {
    format!("{}{}", method.name(), method.descriptor())
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn write_cfg_file<P: AsRef<Path>>(base_dir: P, method: &Method, cfg: &Cfg) -> JfResult<PathBuf> {
    // prepare directory (base_dir/fully/qualified/class/name)
    let mut path = base_dir.as_ref().to_path_buf();
    path.push(method.class_name());
    create_dir_all(&path)?;

    path.push(file_stem(method));
    path.set_extension("dot");
    let mut file = File::create(&path)?;
    file.write_all(cfg.to_dot().as_bytes())?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_stems() {
        let program = jf_bytecode::parse(
            "method Foo.<init>(Ljava/lang/String;)V locals 2\n  0: return\nend",
        )
        .unwrap();
        let method = program.iter_methods().next().unwrap();
        assert_eq!(file_stem(method), "_init__Ljava_lang_String__V");
    }
}
