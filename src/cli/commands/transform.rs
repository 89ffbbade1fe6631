//! Transform command - run one file through the pipeline

use crate::cli::args::TransformArgs;
use crate::config::Config;
use crate::error::{TcacheError, TcacheResult};
use crate::pipeline::{FileHitInstrumenter, TransformPipeline, TransformRequest};
use console::style;
use std::sync::Arc;
use tracing::{debug, info};

/// Execute the transform command
pub async fn execute(args: TransformArgs, config: &Config) -> TcacheResult<()> {
    let path = args
        .file
        .canonicalize()
        .map_err(|source| TcacheError::SourceRead {
            path: args.file.clone(),
            source,
        })?;

    let mut config = config.clone();
    if args.no_cache {
        debug!("Transform cache disabled (--no-cache)");
        config.cache.enabled = false;
    }
    let collect_coverage = args.coverage || config.coverage.collect;

    let pipeline = TransformPipeline::builder(config)
        .instrumenter(Arc::new(FileHitInstrumenter))
        .build()?;

    if !pipeline.should_transform(&path) {
        info!("No transform rule matches {}", path.display());
    }

    let mut request = TransformRequest::new(&path).with_coverage(collect_coverage);
    if args.core_module {
        request = request.core_module();
    }

    let result = if args.async_mode {
        pipeline.transform_async(request).await?
    } else {
        pipeline.transform(request)?
    };

    println!("{}", result.code);

    if args.show_map {
        match &result.source_map_path {
            Some(map) => eprintln!("{} {}", style("Source map:").cyan(), map.display()),
            None => eprintln!("{}", style("No source map").dim()),
        }
    }

    Ok(())
}
