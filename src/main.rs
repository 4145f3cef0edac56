use std::{collections::BTreeMap, process, sync::Arc};

use futures::future::join_all;
use serde::Serialize;
use townsite::{
    config::{self, Command, ResolveArgs, Settings},
    error::AppError,
    infra::{http::HttpMediaResolver, telemetry},
    media::{CoordinatorConfig, MediaUrls, ResolutionCoordinator, ResolvedEntry},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        Some(Command::Resolve(args)) => run_resolve(&settings, args).await,
        None => Err(AppError::unexpected(
            "no command given; try `townsite resolve <ID>...`",
        )),
    }
}

async fn run_resolve(settings: &Settings, args: ResolveArgs) -> Result<(), AppError> {
    let resolver = Arc::new(HttpMediaResolver::new(
        &settings.endpoint.base_url,
        settings.endpoint.request_timeout,
    )?);

    let coordinator = (!args.degraded).then(|| {
        ResolutionCoordinator::new(CoordinatorConfig::from(&settings.media), resolver.clone())
    });
    let media = MediaUrls::from_context(coordinator.as_ref(), resolver);

    let lookups = args.ids.iter().map(|id| media.resolve(id.as_str()));
    let entries = join_all(lookups).await;

    let resolved = entries.iter().filter(|entry| entry.is_some()).count();
    info!(
        requested = args.ids.len(),
        resolved,
        unresolved = args.ids.len() - resolved,
        degraded = args.degraded,
        "Media resolution finished"
    );
    if let Some(coordinator) = coordinator.as_ref() {
        let stats = coordinator.stats();
        info!(
            cached = stats.cached,
            errored = stats.errored,
            "Coordinator state at exit"
        );
        coordinator.shutdown();
    }

    let results = args.ids.iter().map(String::as_str).zip(entries.iter());
    if args.json {
        print_json(results)
    } else {
        print_lines(results);
        Ok(())
    }
}

#[derive(Serialize)]
struct ResolvedOutput<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<&'a str>,
    inline_preview: bool,
}

impl<'a> From<&'a ResolvedEntry> for ResolvedOutput<'a> {
    fn from(entry: &'a ResolvedEntry) -> Self {
        Self {
            url: &entry.url,
            mime_type: entry.mime_type.as_deref(),
            inline_preview: entry.supports_inline_preview(),
        }
    }
}

fn print_json<'a>(
    results: impl Iterator<Item = (&'a str, &'a Option<Arc<ResolvedEntry>>)>,
) -> Result<(), AppError> {
    let output: BTreeMap<&str, Option<ResolvedOutput<'_>>> = results
        .map(|(id, entry)| (id, entry.as_deref().map(ResolvedOutput::from)))
        .collect();
    let rendered = serde_json::to_string_pretty(&output)
        .map_err(|err| AppError::unexpected(format!("failed to encode output: {err}")))?;
    println!("{rendered}");
    Ok(())
}

fn print_lines<'a>(results: impl Iterator<Item = (&'a str, &'a Option<Arc<ResolvedEntry>>)>) {
    for (id, entry) in results {
        match entry {
            Some(entry) => println!("{id}\t{}", entry.url),
            None => println!("{id}\t<unresolved>"),
        }
    }
}
