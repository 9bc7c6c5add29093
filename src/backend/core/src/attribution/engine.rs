//! Conversion attribution over the touchpoint stream.
//!
//! Attribution is derived, never stored: every call recomputes credit
//! from the touchpoints inside the lookback window, so a model change
//! needs no backfill.

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use metrics::counter;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::attribution::model::{
    roi, AttributionModel, AttributionResult, ChannelPerformance, ChannelReport,
    Conversion, CreditedTouchpoint,
};
use crate::config::AttributionConfig;
use crate::error::Result;
use crate::events::{EngineEvent, EventEnvelope, EventSink};
use crate::store::{SpendLedger, TouchpointStore};

/// Multi-model conversion attribution and channel reporting.
pub struct AttributionEngine<S> {
    store: Arc<S>,
    events: Arc<dyn EventSink>,
    config: AttributionConfig,
}

impl<S: TouchpointStore + SpendLedger> AttributionEngine<S> {
    pub fn new(store: Arc<S>, events: Arc<dyn EventSink>, config: AttributionConfig) -> Self {
        Self {
            store,
            events,
            config,
        }
    }

    /// Attribute one conversion across the touchpoints in its window.
    ///
    /// The window is [conversion - lookback, conversion): anchored on
    /// the conversion's own timestamp, never the wall clock, so the
    /// result is reproducible for historical conversions. An empty
    /// window yields a zero-credit result, not an error.
    #[instrument(skip(self, conversion), fields(actor_id = %conversion.actor_id, model = model.name()))]
    pub async fn attribute(
        &self,
        conversion: &Conversion,
        model: AttributionModel,
    ) -> Result<AttributionResult> {
        let window_start = conversion.occurred_at - Duration::days(self.config.window_days);
        let touchpoints = self
            .store
            .touchpoints_in_window(&conversion.actor_id, window_start, conversion.occurred_at)
            .await?;

        if touchpoints.is_empty() {
            debug!(
                actor_id = %conversion.actor_id,
                value = conversion.value,
                "Conversion has no touchpoints in window"
            );
            counter!("signalpath_unattributed_conversions_total").increment(1);
            return Ok(AttributionResult {
                actor_id: conversion.actor_id.clone(),
                model,
                conversion_value: conversion.value,
                conversion_at: conversion.occurred_at,
                touchpoints: Vec::new(),
                channel_credit: HashMap::new(),
            });
        }

        let weights = model.weights(&touchpoints, conversion.occurred_at);

        let mut channel_credit: HashMap<String, f64> = HashMap::new();
        let credited: Vec<CreditedTouchpoint> = touchpoints
            .into_iter()
            .zip(weights)
            .map(|(touchpoint, weight)| {
                let credited_value = weight * conversion.value;
                *channel_credit.entry(touchpoint.channel.clone()).or_insert(0.0) +=
                    credited_value;
                CreditedTouchpoint {
                    touchpoint,
                    weight,
                    credited_value,
                }
            })
            .collect();

        self.events
            .emit(EventEnvelope::new(EngineEvent::ConversionAttributed {
                actor_id: conversion.actor_id.clone(),
                model: model.name().to_string(),
                conversion_value: conversion.value,
                touchpoint_count: credited.len(),
            }));

        counter!("signalpath_attributions_total", "model" => model.name()).increment(1);

        Ok(AttributionResult {
            actor_id: conversion.actor_id.clone(),
            model,
            conversion_value: conversion.value,
            conversion_at: conversion.occurred_at,
            touchpoints: credited,
            channel_credit,
        })
    }

    /// Channel-level report over every conversion in the window.
    ///
    /// Conversions are attributed concurrently within a bounded pool;
    /// per-channel credit is then joined against recorded spend for
    /// ROI.
    #[instrument(skip(self), fields(%org_id, model = model.name()))]
    pub async fn attribution_report(
        &self,
        org_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        model: AttributionModel,
    ) -> Result<ChannelReport> {
        let conversions = self.store.conversions_in_window(org_id, start, end).await?;
        let total_conversions = conversions.len() as u64;

        let results: Vec<AttributionResult> = stream::iter(conversions)
            .map(|conversion| async move { self.attribute(&conversion, model).await })
            .buffer_unordered(self.config.report_concurrency)
            .try_collect()
            .await?;

        let mut attributed_value: HashMap<String, f64> = HashMap::new();
        let mut conversion_count: HashMap<String, u64> = HashMap::new();
        let mut unattributed_conversions = 0_u64;
        let mut unattributed_value = 0.0_f64;

        for result in &results {
            if !result.is_attributed() {
                unattributed_conversions += 1;
                unattributed_value += result.conversion_value;
                continue;
            }
            // A channel counts toward a conversion only when it earned
            // credit; single-touch models leave zero-weight entries for
            // the other channels in the journey.
            let mut credited: HashSet<&str> = HashSet::new();
            for touchpoint in &result.touchpoints {
                if touchpoint.weight > 0.0 {
                    credited.insert(touchpoint.touchpoint.channel.as_str());
                }
            }
            for channel in credited {
                let credit = result.channel_credit.get(channel).copied().unwrap_or(0.0);
                *attributed_value.entry(channel.to_string()).or_insert(0.0) += credit;
                *conversion_count.entry(channel.to_string()).or_insert(0) += 1;
            }
        }

        let spend = self.store.spend_by_channel(org_id, start, end).await?;

        // Channels with spend but no credit still appear, with zero
        // attributed value and negative ROI.
        let mut channel_names: Vec<String> = attributed_value
            .keys()
            .chain(spend.keys())
            .cloned()
            .collect();
        channel_names.sort();
        channel_names.dedup();

        let channels = channel_names
            .into_iter()
            .map(|channel| {
                let value = attributed_value.get(&channel).copied().unwrap_or(0.0);
                let channel_spend = spend.get(&channel).copied().unwrap_or(0.0);
                ChannelPerformance {
                    roi: roi(value, channel_spend),
                    conversion_count: conversion_count.get(&channel).copied().unwrap_or(0),
                    attributed_value: value,
                    spend: channel_spend,
                    channel,
                }
            })
            .collect();

        Ok(ChannelReport {
            org_id,
            window_start: start,
            window_end: end,
            model,
            channels,
            unattributed_conversions,
            unattributed_value,
            total_conversions,
        })
    }
}
