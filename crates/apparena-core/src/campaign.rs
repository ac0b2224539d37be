// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Campaign and ad-click parameters carried in page query strings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ad-click query parameters and the network each one belongs to.
const AD_QUERY_IDS: [(&str, &str); 2] = [("btid", "dataxu"), ("urid", "millennial-media")];

fn query_pairs(query: &str) -> Vec<(String, String)> {
	let query = query.strip_prefix('?').unwrap_or(query);
	// Stray `?` separators show up when a URL is concatenated twice.
	let normalized = query.replace('?', "&");
	url::form_urlencoded::parse(normalized.as_bytes())
		.into_owned()
		.collect()
}

/// Extracts `utm_*` parameters as a campaign object.
///
/// `utm_campaign` becomes `name`; every other parameter loses its `utm_`
/// prefix. Later duplicates win.
pub fn utm(query: &str) -> Map<String, Value> {
	let mut campaign = Map::new();
	for (key, value) in query_pairs(query) {
		let Some(param) = key.strip_prefix("utm_") else {
			continue;
		};
		if param.is_empty() {
			continue;
		}
		let param = if param == "campaign" { "name" } else { param };
		campaign.insert(param.to_string(), Value::String(value));
	}
	campaign
}

/// Referrer ad-click attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdParams {
	pub id: String,
	#[serde(rename = "type")]
	pub network: String,
}

impl AdParams {
	pub fn to_map(&self) -> Map<String, Value> {
		let mut map = Map::new();
		map.insert("id".to_string(), Value::String(self.id.clone()));
		map.insert("type".to_string(), Value::String(self.network.clone()));
		map
	}
}

/// Finds the first known ad-click id in `query`.
pub fn ad_params(query: &str) -> Option<AdParams> {
	let pairs = query_pairs(query);
	AD_QUERY_IDS.iter().find_map(|(param, network)| {
		pairs
			.iter()
			.find(|(key, _)| key == param)
			.map(|(_, id)| AdParams {
				id: id.clone(),
				network: (*network).to_string(),
			})
	})
}
