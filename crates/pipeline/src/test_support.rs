//! Fixtures and in-memory sources shared by the pipeline tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use common::{Error, Region, RegionTable};
use rki_client::{CaseSource, RawCaseDataset, RawCaseEntry, RegionSource};
use tokio::sync::{Mutex, Notify};

pub fn bavaria() -> Region {
    Region {
        id: "09000".into(),
        name: "Bavaria".into(),
        district_type: String::new(),
        state: "Bayern".into(),
        population: 13_000_000,
        coordinates: None,
    }
}

pub fn bavaria_table() -> RegionTable {
    RegionTable::new(vec![bavaria()]).expect("valid table")
}

/// January `n`, 2021.
pub fn day(n: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 1, n).expect("valid date")
}

pub fn day_ms(n: u32) -> i64 {
    day(n)
        .and_hms_opt(0, 0, 0)
        .expect("midnight")
        .and_utc()
        .timestamp_millis()
}

pub fn raw(entries: Vec<RawCaseEntry>) -> RawCaseDataset {
    RawCaseDataset {
        entries,
        fetched_at: Utc::now(),
    }
}

/// Replays scripted responses in order.
pub struct FakeCases {
    responses: Mutex<VecDeque<Result<RawCaseDataset, Error>>>,
}

impl FakeCases {
    pub fn new(responses: Vec<Result<RawCaseDataset, Error>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl CaseSource for FakeCases {
    async fn fetch_cases(&self) -> Result<RawCaseDataset, Error> {
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(Error::Fetch("no scripted response left".into())))
    }
}

/// Holds every fetch until `release` is called.
pub struct BlockingCases {
    dataset: RawCaseDataset,
    gate: Notify,
}

impl BlockingCases {
    pub fn new(dataset: RawCaseDataset) -> Self {
        Self {
            dataset,
            gate: Notify::new(),
        }
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl CaseSource for BlockingCases {
    async fn fetch_cases(&self) -> Result<RawCaseDataset, Error> {
        self.gate.notified().await;
        Ok(self.dataset.clone())
    }
}

pub struct FakeRegions {
    responses: Mutex<VecDeque<Result<Vec<Region>, Error>>>,
}

impl FakeRegions {
    pub fn new(responses: Vec<Result<Vec<Region>, Error>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl RegionSource for FakeRegions {
    async fn fetch_regions(&self) -> Result<Vec<Region>, Error> {
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(Error::Fetch("no scripted response left".into())))
    }
}
