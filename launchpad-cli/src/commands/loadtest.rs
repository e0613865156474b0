use anyhow::{bail, Context, Result};
use launchpad_loadtest::{Credential, DriverConfig, LoadDriver, LoadError, LoadProfile, LoadReport, Thresholds};
use secrecy::{ExposeSecret, SecretString};

use crate::cli::{LoadtestArgs, OutputFormat};
use crate::commands::cancel_on_ctrl_c;
use crate::config::Config;

pub async fn run_loadtest(args: LoadtestArgs) -> Result<()> {
    let config = Config::load()?;
    let credentials = credentials(&args.credentials, config.load_credentials.as_ref())?;
    let profile: LoadProfile = args.profile.parse()?;

    let driver_config = DriverConfig {
        profile,
        think_time: args.think_time,
        thresholds: Thresholds {
            p95_evaluate: args.p95_evaluate,
            max_error_rate: args.max_error_rate,
        },
        ..DriverConfig::new(args.base_url.clone(), credentials)
    };

    let driver = LoadDriver::new(driver_config, cancel_on_ctrl_c())?;
    let report = driver.run().await;

    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => print_report(&args.base_url, &report),
    }

    if !report.passed() {
        bail!("{} threshold(s) violated", report.violations.len());
    }
    Ok(())
}

/// `--credential` flags win over the environment; there is no default
fn credentials(flags: &[String], from_env: Option<&SecretString>) -> Result<Vec<Credential>> {
    let credentials = if !flags.is_empty() {
        Credential::parse_list(&flags.join(",")).context("Invalid --credential value")?
    } else if let Some(raw) = from_env {
        Credential::parse_list(raw.expose_secret())
            .with_context(|| format!("Invalid {}", launchpad_loadtest::CREDENTIALS_VAR))?
    } else {
        Vec::new()
    };

    if credentials.is_empty() {
        return Err(LoadError::NoCredentials.into());
    }
    Ok(credentials)
}

fn print_report(base_url: &str, report: &LoadReport) {
    let m = &report.metrics;
    let ms = |v: Option<u64>| v.map(|v| format!("{}ms", v)).unwrap_or_else(|| "-".to_string());

    println!();
    println!("Load test: {}", base_url);
    println!("{}", "=".repeat(80));
    println!("  Duration:        {:.1}s (peak {} users)", report.duration_secs, report.peak_users);
    println!("  Iterations:      {}", m.iterations);
    println!("  Requests:        {}", m.requests);
    println!("  Checks:          {} ({} failed, {:.2}%)", m.checks, m.failed_checks, m.error_rate * 100.0);
    println!();
    println!("  Evaluate calls:  {}", m.evaluate_count);
    println!(
        "    mean {}  p50 {}  p95 {}  p99 {}  max {}",
        ms(m.evaluate_mean_ms),
        ms(m.evaluate_p50_ms),
        ms(m.evaluate_p95_ms),
        ms(m.evaluate_p99_ms),
        ms(m.evaluate_max_ms)
    );
    println!();
    if report.passed() {
        println!("✓ All thresholds passed");
    } else {
        for violation in &report.violations {
            println!("✗ {}", violation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_win_over_environment() {
        let env = SecretString::from("env-user:env-pass".to_string());
        let creds = credentials(&["flag-user:flag-pass".to_string()], Some(&env)).unwrap();
        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].username, "flag-user");
    }

    #[test]
    fn test_environment_fallback() {
        let env = SecretString::from("a:1,b:2".to_string());
        let creds = credentials(&[], Some(&env)).unwrap();
        assert_eq!(creds.len(), 2);
    }

    #[test]
    fn test_no_default_credentials() {
        let err = credentials(&[], None).unwrap_err();
        assert!(err.to_string().contains("LAUNCHPAD_LOAD_CREDENTIALS"));
    }
}
