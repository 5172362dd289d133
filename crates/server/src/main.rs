use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use riskmap_ai::{AnthropicHedger, DeepSeekHedger, FallbackHedger, Hedger};
use riskmap_infra::AppConfig;
use riskmap_infra::jobs::{ReportJob, Runner, shutdown_channel};
use riskmap_infra::notify::ResendMailer;
use riskmap_infra::store::PgReportStore;
use riskmap_observability::LogFormat;
use riskmap_scoring::Scorer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;

    riskmap_observability::init(if config.environment.is_production() {
        LogFormat::Json
    } else {
        LogFormat::Text
    });

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to postgres")?;
    let store = Arc::new(PgReportStore::new(pool));

    let (primary, secondary) = hedgers(&config)?;
    let hedger = Arc::new(FallbackHedger::new(primary, secondary));

    let mailer = Arc::new(
        ResendMailer::new(
            config.resend_api_key.clone(),
            &config.email_from_addr,
            &config.email_from_name,
            config.base_url.clone(),
        )
        .context("failed to build mail client")?,
    );

    let job = ReportJob::new(store, Scorer::new(config.tier_thresholds), hedger, mailer);
    let runner = Runner::new(job, config.runner_config());

    let (trigger, shutdown) = shutdown_channel();
    let handle = tokio::spawn({
        let runner = runner.clone();
        async move { runner.start(shutdown).await }
    });

    info!(
        environment = ?config.environment,
        workers = config.worker_count,
        "report runner started"
    );

    wait_for_signal().await;
    info!("shutdown requested, draining workers");
    trigger.trigger();

    handle.await.context("runner task panicked")?;

    let stats = runner.stats();
    info!(
        completed = stats.completed,
        failed_permanently = stats.failed_permanently,
        "runner stopped"
    );
    Ok(())
}

/// DeepSeek is preferred when both keys are set, with Anthropic behind it.
fn hedgers(
    config: &AppConfig,
) -> anyhow::Result<(Option<Arc<dyn Hedger>>, Option<Arc<dyn Hedger>>)> {
    let deepseek: Option<Arc<dyn Hedger>> = match &config.deepseek {
        Some(p) => Some(Arc::new(
            DeepSeekHedger::new(p.api_key.clone(), p.model.clone())
                .context("failed to build deepseek client")?,
        )),
        None => None,
    };
    let anthropic: Option<Arc<dyn Hedger>> = match &config.anthropic {
        Some(p) => Some(Arc::new(
            AnthropicHedger::new(p.api_key.clone(), p.model.clone())
                .context("failed to build anthropic client")?,
        )),
        None => None,
    };

    Ok(match (deepseek, anthropic) {
        (Some(primary), secondary) => (Some(primary), secondary),
        (None, Some(only)) => (Some(only), None),
        (None, None) => anyhow::bail!("no AI provider configured"),
    })
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(vars: &[(&str, &str)]) -> AppConfig {
        let base = [("DATABASE_URL", "postgres://localhost/riskmap"), ("RESEND_API_KEY", "re_test")];
        AppConfig::from_lookup(|key| {
            base.iter()
                .chain(vars.iter())
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        })
        .unwrap()
    }

    fn names(pair: &(Option<Arc<dyn Hedger>>, Option<Arc<dyn Hedger>>)) -> (Option<&str>, Option<&str>) {
        (pair.0.as_ref().map(|h| h.name()), pair.1.as_ref().map(|h| h.name()))
    }

    #[test]
    fn deepseek_leads_when_both_keys_are_set() {
        let cfg = config(&[("DEEPSEEK_API_KEY", "ds"), ("ANTHROPIC_API_KEY", "an")]);
        let pair = hedgers(&cfg).unwrap();
        assert_eq!(names(&pair), (Some("deepseek"), Some("anthropic")));
    }

    #[test]
    fn single_key_has_no_secondary() {
        let cfg = config(&[("ANTHROPIC_API_KEY", "an")]);
        let pair = hedgers(&cfg).unwrap();
        assert_eq!(names(&pair), (Some("anthropic"), None));
    }
}
