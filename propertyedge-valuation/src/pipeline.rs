//! Valuation pipeline
//!
//! One run per request:
//!
//! 1. Resolve the location (sequential, everything keys on it)
//! 2. Fan out: comparables (+ comparable geocoding) and every area lookup,
//!    each under its own timeout, each failure becoming "absent"
//! 3. Fan in, then the fixed refinement chain over the comparables
//! 4. Estimate, confidence drivers, negotiation points
//!
//! The run is cancellable through a `CancellationToken`; dropping it mid-way
//! drops every in-flight request.

use crate::config::ValuationConfig;
use crate::error::{SourceError, ValuationError, ValuationResult};
use crate::insights::{ComparablesEstimator, ConfidenceDriverBuilder, ValuationOracle};
use crate::refine::{CertificateIndex, EnrichmentEngine, RefinementChain};
use crate::sources::crime::PoliceClient;
use crate::sources::deprivation::DeprivationClient;
use crate::sources::earnings::{affordability, AnnualEarnings, EarningsClient};
use crate::sources::energy::{self, EpcClient};
use crate::sources::flood::FloodClient;
use crate::sources::location::{Geocoder, HttpGeocoder, LocationResolver};
use crate::sources::planning::PlanningClient;
use crate::sources::price_index::PriceIndexClient;
use crate::sources::sold_prices::{ComparablesFetcher, LandRegistryClient, SoldPriceSource};
use crate::sources::{build_http_client, lookup_optional, AreaLookup};
use crate::types::{
    AreaData, ComparableSale, CrimeSummary, DataSource, DeprivationSummary, EnergyCertificate,
    EvidenceBundle, FloodRisk, LocationContext, PlanningSummary, PriceIndexSummary, SubjectProperty,
};
use chrono::{NaiveDate, Utc};
use propertyedge_common::config::{get_user_agent, TomlConfig};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Every external collaborator of the pipeline
pub struct PipelineSources {
    pub geocoder: Arc<dyn Geocoder>,
    pub sold_prices: Arc<dyn SoldPriceSource>,
    pub energy: Arc<dyn AreaLookup<Output = Vec<EnergyCertificate>>>,
    pub crime: Arc<dyn AreaLookup<Output = CrimeSummary>>,
    pub flood: Arc<dyn AreaLookup<Output = FloodRisk>>,
    pub price_index: Arc<dyn AreaLookup<Output = PriceIndexSummary>>,
    pub planning: Arc<dyn AreaLookup<Output = PlanningSummary>>,
    pub earnings: Arc<dyn AreaLookup<Output = AnnualEarnings>>,
    pub deprivation: Arc<dyn AreaLookup<Output = DeprivationSummary>>,
}

impl PipelineSources {
    /// HTTP adapters for the public datasets named in the config
    pub fn http(toml: &TomlConfig, config: &ValuationConfig) -> Result<Self, SourceError> {
        let s = &toml.sources;
        let t = &config.timeouts;
        let client = build_http_client(&get_user_agent(s.contact_email.as_deref()))?;

        Ok(Self {
            geocoder: Arc::new(HttpGeocoder::new(
                client.clone(),
                &s.postcodes_base_url,
                &s.nominatim_base_url,
            )),
            sold_prices: Arc::new(LandRegistryClient::new(
                client.clone(),
                &s.land_registry_sparql_url,
            )),
            energy: Arc::new(EpcClient::new(
                client.clone(),
                &s.epc_base_url,
                s.epc_api_token.clone(),
                t.energy,
            )),
            crime: Arc::new(PoliceClient::new(client.clone(), &s.police_base_url, t.crime)),
            flood: Arc::new(FloodClient::new(client.clone(), &s.flood_base_url, t.flood)),
            price_index: Arc::new(PriceIndexClient::new(
                client.clone(),
                &s.hpi_base_url,
                t.price_index,
            )),
            planning: Arc::new(PlanningClient::new(
                client.clone(),
                &s.planning_base_url,
                t.planning,
            )),
            earnings: Arc::new(EarningsClient::new(client.clone(), &s.nomis_base_url, t.earnings)),
            deprivation: Arc::new(DeprivationClient::new(
                client,
                &s.deprivation_base_url,
                t.deprivation,
            )),
        })
    }
}

pub struct ValuationPipeline {
    resolver: LocationResolver,
    fetcher: ComparablesFetcher,
    sources: PipelineSources,
    enrichment: EnrichmentEngine,
    chain: RefinementChain,
    drivers: ConfidenceDriverBuilder,
    oracle: Arc<dyn ValuationOracle>,
}

impl ValuationPipeline {
    pub fn new(sources: PipelineSources, config: &ValuationConfig) -> Self {
        Self {
            resolver: LocationResolver::new(sources.geocoder.clone(), config.timeouts.geocoding),
            fetcher: ComparablesFetcher::new(
                sources.sold_prices.clone(),
                config.timeouts.sold_prices,
                config.lookback_years,
                config.max_records,
            ),
            sources,
            enrichment: EnrichmentEngine::new(),
            chain: RefinementChain::new(),
            drivers: ConfidenceDriverBuilder::new(),
            oracle: Arc::new(ComparablesEstimator::new()),
        }
    }

    /// Replace the default comparables-based estimator
    pub fn with_oracle(mut self, oracle: Arc<dyn ValuationOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    /// Run the whole pipeline, aborting promptly on cancellation
    pub async fn run(
        &self,
        subject: &SubjectProperty,
        as_of: NaiveDate,
        cancel: &CancellationToken,
    ) -> ValuationResult<EvidenceBundle> {
        if subject.postcode.trim().is_empty() && subject.address.trim().is_empty() {
            return Err(ValuationError::InvalidSubject(
                "address and postcode are both empty".to_string(),
            ));
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(postcode = %subject.postcode, "Valuation cancelled");
                Err(ValuationError::Cancelled)
            }
            bundle = self.execute(subject, as_of) => Ok(bundle),
        }
    }

    async fn execute(&self, subject: &SubjectProperty, as_of: NaiveDate) -> EvidenceBundle {
        let started = Instant::now();

        // Step 1: location
        let ctx = self
            .resolver
            .resolve(&subject.postcode, &subject.address, as_of)
            .await;

        // Step 2: fan-out
        let s = &self.sources;
        let (
            comparables,
            certificates,
            crime,
            flood,
            price_index,
            planning,
            earnings,
            deprivation,
        ) = tokio::join!(
            self.fetch_comparables(&ctx),
            lookup_optional(s.energy.as_ref(), &ctx),
            lookup_optional(s.crime.as_ref(), &ctx),
            lookup_optional(s.flood.as_ref(), &ctx),
            lookup_optional(s.price_index.as_ref(), &ctx),
            lookup_optional(s.planning.as_ref(), &ctx),
            lookup_optional(s.earnings.as_ref(), &ctx),
            lookup_optional(s.deprivation.as_ref(), &ctx),
        );

        // Step 3: provenance, then the refinement chain
        let mut data_sources = BTreeSet::new();
        let present = [
            (DataSource::SoldPrices, !comparables.is_empty()),
            (DataSource::Geocoding, ctx.location.is_some()),
            (DataSource::EnergyCertificates, certificates.is_some()),
            (DataSource::Crime, crime.is_some()),
            (DataSource::Flood, flood.is_some()),
            (DataSource::PriceIndex, price_index.is_some()),
            (DataSource::Planning, planning.is_some()),
            (DataSource::Earnings, earnings.is_some()),
            (DataSource::Deprivation, deprivation.is_some()),
        ];
        for (source, contributed) in present {
            if contributed {
                data_sources.insert(source);
            }
        }

        let certificates = certificates.unwrap_or_default();
        let index = CertificateIndex::from_certificates(&certificates);
        let comparables = self.enrichment.enrich(comparables, &index);
        let comparables = self.chain.refine(comparables, subject, as_of);
        let subject_energy_rating = index.find(&subject.address).and_then(|f| f.rating.clone());

        let area = AreaData {
            energy: energy::summarize(&certificates),
            affordability: affordability(earnings, price_index.as_ref()),
            crime,
            flood,
            price_index,
            planning,
            deprivation,
        };

        // Step 4: insights
        let confidence_drivers = self.drivers.build(&comparables, subject, as_of);
        let estimate = self.oracle.estimate(subject, &comparables, &area).await;

        let bundle = EvidenceBundle {
            postcode: ctx.postcode.clone(),
            location: ctx.location.clone(),
            comparables,
            area,
            data_sources: data_sources.into_iter().collect(),
            confidence_drivers,
            negotiation_points: Vec::new(),
            subject_energy_rating,
            estimate,
            assessment: None,
            as_of,
            generated_at: Utc::now(),
        }
        .repriced(subject);

        info!(
            postcode = %bundle.postcode,
            comparables = bundle.comparables.len(),
            excluded = bundle.comparables.iter().filter(|c| c.excluded).count(),
            sources = bundle.data_sources.len(),
            oracle = self.oracle.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Valuation pipeline complete"
        );
        bundle
    }

    /// Raw comparables with distance from the subject when both ends geocode
    async fn fetch_comparables(&self, ctx: &LocationContext) -> Vec<ComparableSale> {
        let comparables = self.fetcher.fetch(&ctx.postcode, ctx.as_of).await;
        let Some(subject) = ctx.location.as_ref() else {
            return comparables;
        };
        if comparables.is_empty() {
            return comparables;
        }

        let postcodes: Vec<String> = comparables
            .iter()
            .map(|c| c.postcode.trim().to_uppercase())
            .filter(|p| !p.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let coordinates = self.resolver.locate_all(&postcodes).await;

        self.enrichment
            .apply_distances(comparables, (subject.latitude, subject.longitude), &coordinates)
    }
}
