//! propertyedge - command-line valuation
//!
//! Runs one valuation for the property described on the command line and
//! prints the evidence bundle as JSON. Ctrl-C cancels the run.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use propertyedge_common::config::load_toml_config;
use propertyedge_common::logging::init_tracing;
use propertyedge_valuation::{
    PipelineSources, PropertyCategory, SubjectProperty, Tenure, ValuationConfig, ValuationPipeline,
    ValuationService,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TenureArg {
    Freehold,
    Leasehold,
}

/// Command-line arguments for propertyedge
#[derive(Parser, Debug)]
#[command(name = "propertyedge")]
#[command(about = "Evidence-backed valuation for a UK residential property")]
#[command(version)]
struct Args {
    /// Full address of the property
    #[arg(long, env = "PROPERTYEDGE_ADDRESS")]
    address: String,

    /// Full postcode or outward code
    #[arg(long, env = "PROPERTYEDGE_POSTCODE", default_value = "")]
    postcode: String,

    /// flat, terraced, semi-detached, detached or bungalow
    #[arg(long, default_value = "unknown")]
    category: PropertyCategory,

    #[arg(long, default_value_t = 0)]
    bedrooms: u32,

    /// Internal floor area in square metres
    #[arg(long)]
    floor_area: Option<f64>,

    #[arg(long)]
    year_built: Option<u16>,

    #[arg(long, value_enum, default_value = "freehold")]
    tenure: TenureArg,

    /// Annual service charge (leasehold only)
    #[arg(long)]
    service_charge: Option<f64>,

    /// Annual ground rent (leasehold only)
    #[arg(long)]
    ground_rent: Option<f64>,

    /// Remaining lease term in years (leasehold only)
    #[arg(long)]
    lease_years: Option<u32>,

    /// Listing price in pounds
    #[arg(long)]
    asking_price: Option<i64>,

    /// Path to the TOML config file
    #[arg(short, long, env = "PROPERTYEDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Print single-line JSON
    #[arg(long)]
    compact: bool,
}

impl Args {
    fn subject(&self) -> Result<SubjectProperty> {
        let tenure = match self.tenure {
            TenureArg::Freehold => {
                let lease_terms = self.service_charge.is_some()
                    || self.ground_rent.is_some()
                    || self.lease_years.is_some();
                if lease_terms {
                    bail!(
                        "--service-charge, --ground-rent and --lease-years \
                         require --tenure leasehold"
                    );
                }
                Tenure::Freehold
            }
            TenureArg::Leasehold => Tenure::Leasehold {
                annual_service_charge: self.service_charge,
                annual_ground_rent: self.ground_rent,
                remaining_lease_years: self.lease_years,
            },
        };

        Ok(SubjectProperty {
            address: self.address.clone(),
            postcode: self.postcode.clone(),
            category: self.category,
            bedrooms: self.bedrooms,
            floor_area_sqm: self.floor_area,
            year_built: self.year_built,
            tenure,
            asking_price: self.asking_price,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml = load_toml_config(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&toml.logging).context("Failed to initialise logging")?;
    let config = ValuationConfig::from_toml(&toml).context("Invalid configuration")?;

    let subject = args.subject()?;
    info!(
        address = %subject.address,
        postcode = %subject.postcode,
        category = %subject.category,
        "Starting valuation"
    );

    let sources = PipelineSources::http(&toml, &config).context("Failed to build HTTP client")?;
    let service = ValuationService::new(ValuationPipeline::new(sources, &config), &config);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling valuation");
            on_signal.cancel();
        }
    });

    let outcome = service
        .value(&subject, Utc::now().date_naive(), &cancel)
        .await
        .context("Valuation failed")?;

    let json = if args.compact {
        serde_json::to_string(&outcome.bundle)?
    } else {
        serde_json::to_string_pretty(&outcome.bundle)?
    };
    println!("{}", json);

    Ok(())
}
