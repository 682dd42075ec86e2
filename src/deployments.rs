//! The two dashboards served from this crate. They share every moving part
//! and differ only in the queries, page layout and bindings declared here.

use crate::bindings::{BindingError, BindingGraph, GraphError, Inputs, Outcome};
use crate::config::DeploymentKind;
use crate::figures::{Plotter, ProfileSpec, SeriesSpec};
use crate::layout::{Layout, Node};
use crate::queries::{ParamKind, QuerySpec};
use crate::reference::{ReferenceData, ReferenceSpec};
use crate::selection::{DateRange, combine_timestamp};
use crate::status::StatusSpec;
use chrono::{Duration, NaiveDate};
use std::sync::Arc;

/// Process-wide context handed to every binding.
pub struct Dashboard {
    pub plotter: Plotter,
    pub reference: ReferenceData,
}

pub struct Deployment {
    pub kind: DeploymentKind,
    pub base_path: &'static str,
    pub title: &'static str,
    pub databases: &'static [&'static str],
    pub queries: &'static [QuerySpec],
    pub reference: &'static [ReferenceSpec],
    pub series: &'static [SeriesSpec],
    pub profiles: &'static [ProfileSpec],
    pub status: Vec<StatusSpec>,
    pub layout: fn(&ReferenceData, NaiveDate) -> Layout,
    pub bindings: fn() -> Result<BindingGraph<Dashboard>, GraphError>,
}

impl DeploymentKind {
    pub fn deployment(self) -> Deployment {
        match self {
            DeploymentKind::DesExport => des_export(),
            DeploymentKind::SiteExplorer => site_explorer(),
        }
    }
}

// --- des_export -------------------------------------------------------------

const PICK_PROMPT: &str = "Please pick a site, date, and time.";

const DES_QUERIES: &[QuerySpec] = &[
    QuerySpec {
        name: "projects_df",
        database: "dcp",
        params: &[],
    },
    QuerySpec {
        name: "pis_df",
        database: "dcp",
        params: &[],
    },
    QuerySpec {
        name: "datasets_df",
        database: "borden",
        params: &[],
    },
];

const DES_REFERENCE: &[ReferenceSpec] = &[
    ReferenceSpec {
        query: "projects_df",
        control: Some("project-dropdown"),
        column: "Project",
    },
    ReferenceSpec {
        query: "pis_df",
        control: None,
        column: "pi",
    },
    ReferenceSpec {
        query: "datasets_df",
        control: None,
        column: "dataset",
    },
];

fn des_export() -> Deployment {
    Deployment {
        kind: DeploymentKind::DesExport,
        base_path: "/app/des_export/",
        title: "AQRP DES OUTPUT TOOL",
        databases: &["dcp", "borden"],
        queries: DES_QUERIES,
        reference: DES_REFERENCE,
        series: &[],
        profiles: &[],
        status: Vec::new(),
        layout: des_layout,
        bindings: des_bindings,
    }
}

fn des_layout(reference: &ReferenceData, _today: NaiveDate) -> Layout {
    Layout {
        title: "AQRP DES OUTPUT TOOL".to_string(),
        nodes: vec![
            Node::Banner {
                title: "AQRP DES OUTPUT TOOL".to_string(),
                image: None,
            },
            Node::Heading("PICK A PROJECT".to_string()),
            Node::Dropdown {
                id: "project-dropdown",
                options: reference.options("project-dropdown"),
                clearable: false,
            },
            Node::DatePicker {
                id: "date",
                placeholder: "Select date",
                default: None,
            },
            Node::TimeInput {
                id: "time",
                default: Some("12:00".to_string()),
            },
            Node::Divider,
            Node::Text { id: "picked-output" },
        ],
    }
}

fn des_bindings() -> Result<BindingGraph<Dashboard>, GraphError> {
    BindingGraph::builder()
        .input("project-dropdown")
        .input("date")
        .input("time")
        .bind(
            "picked-output",
            &["project-dropdown", "date", "time"],
            &["picked-output"],
            picked_output,
        )
        .build()
}

async fn picked_output(inputs: Inputs, _ctx: Arc<Dashboard>) -> Result<Outcome, BindingError> {
    let Some(timestamp) = combine_timestamp(inputs.text("date"), inputs.text("time"))? else {
        return Ok(Outcome::single(PICK_PROMPT));
    };
    let site = inputs.text("project-dropdown").unwrap_or_default();
    Ok(Outcome::single(format!(
        "Site: {site} | Selected datetime (UTC): {}",
        timestamp.format("%Y-%m-%d %H:%M:%S%:z")
    )))
}

// --- site_explorer ----------------------------------------------------------

const RANGE_PROMPT: &str = "Pick a site and a start/end date range with start on or before end.";
const SITE_PROMPT: &str = "Pick a site.";

const RANGE_BY_SITE: &[ParamKind] = &[ParamKind::Date, ParamKind::Date, ParamKind::Text];

const SITE_QUERIES: &[QuerySpec] = &[
    QuerySpec {
        name: "sites_df",
        database: "borden",
        params: &[],
    },
    QuerySpec {
        name: "met_hourly",
        database: "borden",
        params: RANGE_BY_SITE,
    },
    QuerySpec {
        name: "wind_hourly",
        database: "borden",
        params: RANGE_BY_SITE,
    },
    QuerySpec {
        name: "tower_profile",
        database: "borden",
        params: &[ParamKind::Text],
    },
    QuerySpec {
        name: "met_latest",
        database: "borden",
        params: &[],
    },
];

const SITE_REFERENCE: &[ReferenceSpec] = &[ReferenceSpec {
    query: "sites_df",
    control: Some("site-dropdown"),
    column: "site",
}];

const SITE_SERIES: &[SeriesSpec] = &[
    SeriesSpec {
        id: "temperature",
        title: "Air temperature",
        query: "met_hourly",
        x_column: "ts",
        y_columns: &["air_temp", "dew_point"],
        y_title: "°C",
        by_site: true,
    },
    SeriesSpec {
        id: "wind",
        title: "Wind speed",
        query: "wind_hourly",
        x_column: "ts",
        y_columns: &["wind_speed", "wind_gust"],
        y_title: "m/s",
        by_site: true,
    },
];

const SITE_PROFILES: &[ProfileSpec] = &[ProfileSpec {
    title: "Latest tower profile",
    query: "tower_profile",
    level_column: "height_m",
    level_title: "Height (m)",
    value_columns: &["air_temp"],
    x_title: "°C",
    by_site: true,
}];

fn site_explorer() -> Deployment {
    Deployment {
        kind: DeploymentKind::SiteExplorer,
        base_path: "/app/site_explorer/",
        title: "SITE DATA EXPLORER",
        databases: &["borden"],
        queries: SITE_QUERIES,
        reference: SITE_REFERENCE,
        series: SITE_SERIES,
        profiles: SITE_PROFILES,
        status: vec![StatusSpec {
            label: "Met station",
            query: "met_latest",
            window: Duration::hours(2),
        }],
        layout: site_layout,
        bindings: site_bindings,
    }
}

fn site_layout(reference: &ReferenceData, today: NaiveDate) -> Layout {
    Layout {
        title: "SITE DATA EXPLORER".to_string(),
        nodes: vec![
            Node::Banner {
                title: "SITE DATA EXPLORER".to_string(),
                image: None,
            },
            Node::Heading("PICK A SITE".to_string()),
            Node::Dropdown {
                id: "site-dropdown",
                options: reference.options("site-dropdown"),
                clearable: false,
            },
            Node::Heading("DATE RANGE".to_string()),
            Node::DateRange {
                start_id: "start-date",
                end_id: "end-date",
                start: Some((today - Duration::days(6)).to_string()),
                end: Some(today.to_string()),
            },
            Node::Status,
            Node::Divider,
            Node::Text {
                id: "selection-summary",
            },
            Node::Section {
                title: Some("Time series".to_string()),
                children: vec![
                    Node::Graph {
                        id: "temperature-graph",
                    },
                    Node::Graph { id: "wind-graph" },
                ],
            },
            Node::Section {
                title: Some("Profile".to_string()),
                children: vec![Node::Graph {
                    id: "profile-graph",
                }],
            },
        ],
    }
}

fn site_bindings() -> Result<BindingGraph<Dashboard>, GraphError> {
    BindingGraph::builder()
        .input("site-dropdown")
        .input("start-date")
        .input("end-date")
        .bind(
            "selection-summary",
            &["site-dropdown", "start-date", "end-date"],
            &["selection-summary"],
            selection_summary,
        )
        .prompt(RANGE_PROMPT)
        .bind(
            "time-series",
            &["site-dropdown", "start-date", "end-date"],
            &["temperature-graph", "wind-graph"],
            time_series,
        )
        .prompt(RANGE_PROMPT)
        .bind("profile", &["site-dropdown"], &["profile-graph"], profile)
        .prompt(SITE_PROMPT)
        .build()
}

fn picked_range(inputs: &Inputs) -> Result<Option<DateRange>, BindingError> {
    Ok(DateRange::from_inputs(
        inputs.text("start-date"),
        inputs.text("end-date"),
    )?)
}

async fn selection_summary(inputs: Inputs, _ctx: Arc<Dashboard>) -> Result<Outcome, BindingError> {
    let (Some(site), Some(range)) = (inputs.text("site-dropdown"), picked_range(&inputs)?) else {
        return Ok(Outcome::NoUpdate);
    };
    Ok(Outcome::single(format!(
        "Site: {site} | {} to {} ({} days)",
        range.start,
        range.end,
        range.days()
    )))
}

/// Both time-series figures are produced together or not at all.
async fn time_series(inputs: Inputs, ctx: Arc<Dashboard>) -> Result<Outcome, BindingError> {
    let (Some(site), Some(range)) = (inputs.text("site-dropdown"), picked_range(&inputs)?) else {
        return Ok(Outcome::NoUpdate);
    };
    let (temperature, wind) = futures::try_join!(
        ctx.plotter.build_time_series(&range, "temperature", Some(site)),
        ctx.plotter.build_time_series(&range, "wind", Some(site)),
    )?;
    Ok(Outcome::Update(vec![temperature.to_json(), wind.to_json()]))
}

async fn profile(inputs: Inputs, ctx: Arc<Dashboard>) -> Result<Outcome, BindingError> {
    let Some(site) = inputs.text("site-dropdown") else {
        return Ok(Outcome::NoUpdate);
    };
    let figure = ctx.plotter.build_profile("tower_profile", Some(site)).await?;
    Ok(Outcome::single(figure.to_json()))
}
