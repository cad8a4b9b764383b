mod args;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};

use tolxanka::av::AvPool;
use tolxanka::cache::PageCache;
use tolxanka::config::Settings;
use tolxanka::durable::DurableStore;
use tolxanka::hive::Hive;
use tolxanka::library::MediaLibrary;
use tolxanka::notify::LoggingNotifier;
use tolxanka::render::PlainRenderer;
use tolxanka::sequencer;
use tolxanka::users::UserRegistry;

use crate::args::Args;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.debug {
        tracing_subscriber::fmt().with_max_level(Level::TRACE).init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "fatal error during startup or run");
            ExitCode::FAILURE
        },
    }
}

/// Wires config → durable store (with recovery) → media library → user
/// registry → sequencer → A/V pool, runs until a termination signal arrives,
/// then flushes the durable queues one last time before exiting.
async fn run(args: Args) -> Result<()> {
    let settings =
        Settings::load(&args.config_dir).context("loading configuration")?;
    let word_filters =
        settings.compiled_word_filters().context("compiling word filters")?;
    let settings = Arc::new(settings);

    let durable = Arc::new(
        DurableStore::open(&args.database, &settings.database)
            .context("opening durable store")?,
    );

    let media = Arc::new(MediaLibrary::new(&settings.media));
    for entry in durable
        .recover_media(&settings.banreasons)
        .context("recovering media records")?
    {
        media.recover_insert(entry);
    }

    let users = Arc::new(UserRegistry::new());
    let cache = Arc::new(PageCache::new());
    // Held for the process lifetime; the (out-of-scope) upload handler would
    // submit probe/thumbnail jobs to this pool via `AvPool::run`.
    let _av_pool = AvPool::start(settings.video.workers);

    let hive = Hive::new(
        settings.clone(),
        word_filters,
        durable.clone(),
        media.clone(),
        users.clone(),
        cache.clone(),
        Arc::new(PlainRenderer),
        Arc::new(LoggingNotifier),
    );

    let recovered_threads =
        durable.recover_threads().context("recovering threads")?;
    let recovered_posts = durable.recover_posts().context("recovering posts")?;
    let recovered_bans = durable.recover_bans().context("recovering bans")?;

    let (sequencer, join) = sequencer::spawn(hive, 256);

    {
        let threads_recovered = recovered_threads.len();
        let posts_recovered = recovered_posts.len();
        sequencer
            .submit(move |hive| {
                hive.recover(recovered_threads, recovered_posts, recovered_bans)
            })
            .await
            .context("replaying durable state")?;
        info!(threads_recovered, posts_recovered, "recovery complete");
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(error) => {
                    warn!(%error, "failed to install SIGTERM handler");
                    return;
                },
            };
            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(error) => {
                    warn!(%error, "failed to install SIGINT handler");
                    return;
                },
            };
            select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = sigint.recv() => info!("received SIGINT"),
            }
            cancel.cancel();
        });
    }

    {
        let cancel = cancel.clone();
        let sequencer = sequencer.clone();
        tokio::spawn(async move {
            let lifetime = Duration::from_secs(60);
            let mut ticker = time::interval(lifetime);
            loop {
                select! {
                    _ = ticker.tick() => {
                        sequencer.submit(|hive| hive.tick()).await;
                    },
                    _ = cancel.cancelled() => break,
                }
            }
        });
    }

    let dump_interval = settings.database.dump_interval.0.max(Duration::from_millis(1));
    let mut ticker = time::interval(dump_interval);
    loop {
        select! {
            _ = ticker.tick() => {
                let durable = durable.clone();
                if let Err(error) = tokio::task::spawn_blocking(move || durable.flush())
                    .await
                    .context("durable flush task panicked")?
                {
                    error!(%error, "durable flush failed");
                }
            },
            _ = cancel.cancelled() => break,
        }
    }

    info!("shutting down, performing final durable flush");
    let final_flush = {
        let durable = durable.clone();
        tokio::task::spawn_blocking(move || durable.flush()).await
    };
    match final_flush {
        Ok(Ok(())) => info!("final flush complete"),
        Ok(Err(error)) => error!(%error, "final flush failed"),
        Err(error) => error!(%error, "final flush task panicked"),
    }

    drop(sequencer);
    let _ = time::timeout(Duration::from_secs(5), join).await;

    Ok(())
}
