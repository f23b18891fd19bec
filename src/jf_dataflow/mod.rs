use crate::analysis::dataflow::{DataflowPrinter, FactAnnotator};
use crate::analysis::errors::{AnalysisError, AnalysisResult};
use crate::prelude::*;
use clap::ArgMatches;
use nu_ansi_term::Color;
use rayon::prelude::*;

/// Analyses that can be dumped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Types,
    StackDepth,
    LiveLocals,
    Dominators,
    PostDominators,
}

impl Kind {
    fn from_arg(arg: &str) -> JfResult<Self> {
        match arg {
            "types" => Ok(Self::Types),
            "stack-depth" => Ok(Self::StackDepth),
            "live-locals" => Ok(Self::LiveLocals),
            "dominators" => Ok(Self::Dominators),
            "post-dominators" => Ok(Self::PostDominators),
            _ => Err(JfError::BadArguments(format!("unknown analysis '{arg}'"))),
        }
    }
}

fn dump(cache: &MethodAnalysisCache, kind: Kind, annotator: FactAnnotator) -> AnalysisResult<String> {
    let dump = match kind {
        Kind::Types => DataflowPrinter::new(&*cache.type_dataflow()?, annotator).to_string(),
        Kind::StackDepth => DataflowPrinter::new(&*cache.stack_depth()?, annotator).to_string(),
        Kind::LiveLocals => DataflowPrinter::new(&*cache.live_locals()?, annotator).to_string(),
        Kind::Dominators => {
            DataflowPrinter::new(cache.dominators()?.dataflow(), annotator).to_string()
        }
        Kind::PostDominators => {
            DataflowPrinter::new(cache.post_dominators()?.dataflow(), annotator).to_string()
        }
    };
    Ok(dump)
}

pub fn run(args: &ArgMatches) -> JfResult<()> {
    init_logger(args);

    let (program, hierarchy) = load_program(args)?;
    let kind = Kind::from_arg(
        args.get_one::<String>("analysis")
            .ok_or_else(|| JfError::BadArguments("--analysis needed".to_string()))?,
    )?;
    let annotator = FactAnnotator {
        edges: args.get_flag("edges"),
    };
    let mut config = DataflowConfig::new();
    if let Some(max_iterations) = args.get_one::<usize>("max-iterations") {
        config = config.max_iterations(*max_iterations);
    }
    log::info!("running {kind:?} analysis");

    let methods = filtered_methods(&program, args)?;
    // caches are not shareable between threads, each method gets its own
    let results: Vec<(String, AnalysisResult<String>)> = methods
        .par_iter()
        .map(|method| {
            let cache = MethodAnalysisCache::new(
                method,
                &hierarchy,
                &LogLookupFailures,
                config.clone(),
            );
            (method.full_name(), dump(&cache, kind, annotator))
        })
        .collect();

    let mut nb_fails = 0;
    let mut last_res = Ok(());
    for (name, res) in results {
        match res {
            Ok(dump) => println!("{dump}"),
            Err(err) => {
                log::error!("{name}: {err}");
                println!("{}", Color::Red.paint(format!("{name}: {err}")));
                nb_fails += 1;
                last_res = Err(err);
            }
        }
    }

    log::info!("");
    log::info!(
        "analyzed methods: {} / {}",
        methods.len() - nb_fails,
        methods.len()
    );

    last_res.map_err(|err: AnalysisError| err.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli;

    #[test]
    fn analysis_kinds() {
        let args = cli::dataflow().get_matches_from(["jf-dataflow", "-i", "in.jasm"]);
        let kind = Kind::from_arg(args.get_one::<String>("analysis").unwrap()).unwrap();
        assert_eq!(kind, Kind::Types);
        assert!(matches!(
            Kind::from_arg("reaching-defs"),
            Err(JfError::BadArguments(_))
        ));
    }

    #[test]
    fn dumps() {
        let program = jf_bytecode::parse(
            "method Foo.f(I)I static locals 1\n  0: iload 0\n  1: ireturn\nend",
        )
        .unwrap();
        let hierarchy = Hierarchy::from_program(&program);
        let method = program.get_method("Foo.f(I)I").unwrap();
        let cache =
            MethodAnalysisCache::new(method, &hierarchy, &LogLookupFailures, DataflowConfig::new());
        let text = dump(&cache, Kind::StackDepth, FactAnnotator::default()).unwrap();
        assert!(text.starts_with("Foo.f(I)I (stack-depth,"));
        let text = dump(&cache, Kind::Types, FactAnnotator { edges: true }).unwrap();
        assert!(text.contains("iload 0"));
        assert!(text.contains("[int |]"));
    }
}
