//! Synthetic base payload builder.
//!
//! Produces a deep, fully-populated `{synthesis, countryAnalysis, scope}`
//! tree for a seed. Every declared field carries a plausible non-empty value
//! so the mutation classes always have real targets.

use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::rng::{RngPurpose, SeededRng};
use crate::scenario::Scenario;

/// Last year shown on every chart.
const LATEST_YEAR: usize = 2025;

const NAME_STEMS: &[&str] = &[
    "Apex", "Meridian", "Lotus", "Northstar", "Harbor", "Summit", "Crescent", "Pioneer",
];
const NAME_SUFFIXES: &[&str] = &["Holdings", "Group", "Industries", "Partners"];
const ENTRY_MODES: &[&str] = &["Joint venture", "Greenfield subsidiary", "Acquisition"];
const RISK_LEVELS: &[&str] = &["Low", "Medium", "High"];

/// Market sections carrying chart data, keyed by payload field name.
pub const CHART_SECTIONS: &[(&str, &str, &[&str])] = &[
    ("marketSizeAndGrowth", "Market Size and Growth", &["Domestic", "Imports"]),
    ("supplyAndDemand", "Supply and Demand", &["Supply", "Demand"]),
    ("segmentMix", "Segment Mix", &["Industrial", "Commercial", "Residential"]),
];

/// Market section carrying table data.
pub const TABLE_SECTION: &str = "pricingAndTariffs";

/// Competitor roster groups under `countryAnalysis.competitors`.
pub const COMPETITOR_GROUPS: &[(&str, &str)] = &[
    ("localMajors", "Local Majors"),
    ("foreignPlayers", "Foreign Players"),
    ("regionalChallengers", "Regional Challengers"),
];

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn company_name(rng: &mut SeededRng) -> String {
    let stem = NAME_STEMS[rng.index(NAME_STEMS.len())];
    let suffix = NAME_SUFFIXES[rng.index(NAME_SUFFIXES.len())];
    format!("{stem} {suffix}")
}

fn chart_years(scenario: &Scenario) -> Vec<String> {
    let first = LATEST_YEAR + 1 - scenario.chart_years;
    (first..=LATEST_YEAR).map(|year| year.to_string()).collect()
}

fn series_values(rng: &mut SeededRng, points: usize) -> Vec<f64> {
    let mut value = 10.0 + rng.next_f64() * 40.0;
    (0..points)
        .map(|_| {
            value *= 1.0 + rng.next_f64() * 0.12;
            round1(value)
        })
        .collect()
}

fn synthesis(scenario: &Scenario, rng: &mut SeededRng) -> Value {
    let Scenario {
        country, industry, ..
    } = scenario;

    let competitors: Vec<Value> = (0..scenario.competitor_count)
        .map(|rank| {
            let share = 5 + rng.index(30);
            json!({
                "name": company_name(rng),
                "description": format!("Rank {} {industry} supplier in {country}", rank + 1),
                "marketShare": format!("{share}%"),
                "strengths": ["Distribution reach", "Regulatory relationships"],
            })
        })
        .collect();

    let options: Vec<Value> = ENTRY_MODES
        .iter()
        .map(|mode| {
            let months = 6 + rng.index(18);
            let investment = 5 + rng.index(45);
            json!({
                "mode": mode,
                "timeline": format!("{months} months"),
                "investment": format!("USD {investment}M"),
                "riskLevel": RISK_LEVELS[rng.index(RISK_LEVELS.len())],
                "pros": [format!("{mode} gives faster access to {country}")],
                "cons": [format!("{mode} requires sustained management attention")],
            })
        })
        .collect();

    let rating = |rng: &mut SeededRng, rationale: String| {
        json!({ "score": 1 + rng.index(10), "rationale": rationale })
    };

    json!({
        "executiveSummary": [
            format!("{country} {industry} demand is growing faster than regional peers"),
            format!("Policy support favours foreign participation in {industry}"),
            "A partnership-led entry balances speed and risk",
        ],
        "keyInsights": [
            {
                "title": "Demand outlook",
                "data": format!("{}% CAGR over {} years", 4 + rng.index(9), scenario.chart_years),
                "implication": "Capacity commitments should be phased",
            },
            {
                "title": "Competitive gaps",
                "data": format!("{} incumbents hold most of the market", scenario.competitor_count),
                "implication": "Differentiate on service quality",
            },
            {
                "title": "Regulatory path",
                "data": format!("{} foundational acts govern licensing", scenario.act_count),
                "implication": "Engage regulators before committing capital",
            },
        ],
        "competitors": competitors,
        "entryStrategy": {
            "options": options,
            "recommendation": format!("Pursue a joint venture to enter {country} within 18 months"),
        },
        "summaryRatings": {
            "marketAttractiveness": rating(rng, format!("{industry} demand is expanding")),
            "regulatoryRisk": rating(rng, "Licensing timelines are predictable".to_owned()),
            "competitiveIntensity": rating(rng, "Incumbents are concentrated".to_owned()),
        },
        "nextSteps": [
            "Shortlist partners",
            "Validate tariff assumptions with regulators",
            format!("Prepare a {} business case", scenario.project_type),
        ],
    })
}

fn country_analysis(scenario: &Scenario, rng: &mut SeededRng) -> Value {
    let Scenario {
        country, industry, ..
    } = scenario;
    let years = chart_years(scenario);

    let acts: Vec<Value> = (0..scenario.act_count)
        .map(|i| {
            json!({
                "name": format!("{country} {industry} Act No. {}", i + 1),
                "year": 1995 + rng.index(30),
                "requirements": "Operators must hold a national licence and file annual reports",
                "penalties": "Fines and licence suspension for repeated breaches",
                "enforcement": "Enforced by the sector ministry with periodic audits",
            })
        })
        .collect();

    let mut market = serde_json::Map::new();
    for (key, title, series_names) in CHART_SECTIONS {
        let series: Vec<Value> = series_names
            .iter()
            .map(|name| json!({ "name": name, "values": series_values(rng, years.len()) }))
            .collect();
        market.insert(
            (*key).to_owned(),
            json!({
                "title": title,
                "keyInsight": format!("{title} in {country} trends upward"),
                "chartData": { "categories": &years, "unit": "USD bn", "series": series },
            }),
        );
    }
    let rows: Vec<Value> = ["Industrial", "Commercial", "Residential", "Public sector"]
        .iter()
        .map(|segment| {
            let tariff = round1(0.05 + rng.next_f64() * 0.2);
            json!([segment, format!("{tariff}"), "Rising"])
        })
        .collect();
    market.insert(
        TABLE_SECTION.to_owned(),
        json!({
            "title": "Pricing and Tariffs",
            "keyInsight": "Tariffs are regulated and reviewed annually",
            "tableData": { "headers": ["Segment", "Tariff (USD/unit)", "Trend"], "rows": rows },
        }),
    );

    let mut competitors = serde_json::Map::new();
    for (key, title) in COMPETITOR_GROUPS {
        let players: Vec<Value> = (0..scenario.competitor_count)
            .map(|_| {
                json!({
                    "name": company_name(rng),
                    "presence": format!("{} regional offices", 1 + rng.index(8)),
                    "description": format!("Established {industry} operator"),
                })
            })
            .collect();
        competitors.insert(
            (*key).to_owned(),
            json!({ "title": title, "players": players }),
        );
    }

    json!({
        "country": country,
        "policy": {
            "foundationalActs": { "title": "Foundational Acts", "acts": acts },
            "nationalPolicy": {
                "title": "National Policy",
                "overview": format!("{country} targets modernisation of {industry} by 2030"),
                "targets": ["Expand private participation", "Raise service coverage"],
            },
            "investmentRestrictions": {
                "title": "Investment Restrictions",
                "overview": "Foreign ownership is capped in licensed activities",
                "ownershipLimits": format!("{}% foreign ownership", 49 + rng.index(3) * 25),
            },
        },
        "market": market,
        "competitors": competitors,
        "summary": {
            "overview": format!("{country} is an attractive {industry} market with manageable risk"),
            "opportunities": ["Underserved secondary cities", "Public tender pipeline"],
            "risks": ["Currency volatility", "Tariff review uncertainty"],
        },
    })
}

fn scope(scenario: &Scenario) -> Value {
    json!({
        "industry": scenario.industry,
        "projectType": scenario.project_type,
        "targetMarkets": [scenario.country],
        "clientContext": format!("{} client evaluating {}", scenario.industry, scenario.country),
        "projectName": format!("{} {}", scenario.country, scenario.project_type),
    })
}

/// Build the unmutated payload for `seed`.
#[must_use]
pub fn build_base_payload(seed: u32) -> Value {
    let mut rng = SeededRng::derive(seed, RngPurpose::Scenario);
    let scenario = Scenario::draw(&mut rng);
    json!({
        "synthesis": synthesis(&scenario, &mut rng),
        "countryAnalysis": country_analysis(&scenario, &mut rng),
        "scope": scope(&scenario),
    })
}

/// Hex SHA-256 of the payload's compact JSON encoding.
#[must_use]
pub fn payload_fingerprint(payload: &Value) -> String {
    format!("{:x}", Sha256::digest(payload.to_string().as_bytes()))
}
