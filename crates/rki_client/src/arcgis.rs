//! ArcGIS FeatureServer response types and page decoding.

use common::{Coordinates, Error, Region};
use serde::Deserialize;

use crate::RawCaseEntry;

// ── FeatureServer response types ──────────────────────────────────────

/// One page of a FeatureServer `query` response.
#[derive(Debug, Deserialize)]
pub struct FeatureResponse<A> {
    // A path default keeps serde from demanding `A: Default`.
    #[serde(default = "Vec::new")]
    pub features: Vec<Feature<A>>,
    /// Set when the server truncated the result and more pages follow.
    #[serde(rename = "exceededTransferLimit", default)]
    pub exceeded_transfer_limit: bool,
    /// ArcGIS reports query errors in the body of an HTTP 200.
    #[serde(default)]
    pub error: Option<ArcGisError>,
}

#[derive(Debug, Deserialize)]
pub struct Feature<A> {
    pub attributes: A,
    /// Present when the query asks for `returnCentroid=true`.
    #[serde(default)]
    pub centroid: Option<Point>,
}

/// A point in the query's output spatial reference (WGS84 for `outSR=4326`).
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    fn to_coordinates(self) -> Option<Coordinates> {
        let valid = self.x.is_finite()
            && self.y.is_finite()
            && (-180.0..=180.0).contains(&self.x)
            && (-90.0..=90.0).contains(&self.y);
        valid.then_some(Coordinates {
            lat: self.y,
            lon: self.x,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ArcGisError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Attributes of the grouped RKI_COVID19 case query.
#[derive(Debug, Deserialize)]
pub struct CaseAttributes {
    #[serde(rename = "IdLandkreis")]
    pub id_landkreis: serde_json::Value, // string or number depending on layer
    #[serde(rename = "Landkreis", default)]
    pub landkreis: Option<String>,
    #[serde(rename = "Meldedatum")]
    pub meldedatum: i64,
    #[serde(rename = "AnzahlFall")]
    pub anzahl_fall: i64,
}

/// Attributes of the RKI_Landkreisdaten layer.
#[derive(Debug, Deserialize)]
pub struct DistrictAttributes {
    #[serde(rename = "RS")]
    pub rs: String,
    #[serde(rename = "GEN")]
    pub gen: String,
    #[serde(rename = "BEZ", default)]
    pub bez: String,
    #[serde(rename = "BL")]
    pub bl: String,
    #[serde(rename = "EWZ")]
    pub ewz: u64,
    #[serde(rename = "NUTS", default)]
    pub nuts: Option<String>,
}

/// A decoded page: the rows plus whether another page follows.
#[derive(Debug)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub has_more: bool,
}

// ── Decoding ──────────────────────────────────────────────────────────

fn decode_page<A>(body: &str, what: &str) -> Result<Page<Feature<A>>, Error>
where
    A: for<'de> Deserialize<'de>,
{
    let resp: FeatureResponse<A> = serde_json::from_str(body)
        .map_err(|e| Error::Parse(format!("{} payload is malformed: {}", what, e)))?;

    if let Some(err) = resp.error {
        return Err(Error::Fetch(format!(
            "{} query rejected by ArcGIS (code={}): {}",
            what, err.code, err.message
        )));
    }

    Ok(Page {
        rows: resp.features,
        has_more: resp.exceeded_transfer_limit,
    })
}

fn district_key(value: &serde_json::Value) -> Result<String, Error> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(Error::Parse(format!(
            "IdLandkreis has unexpected type: {}",
            other
        ))),
    }
}

/// Decode one page of the grouped case query.
pub fn parse_case_page(body: &str) -> Result<Page<RawCaseEntry>, Error> {
    let page: Page<Feature<CaseAttributes>> = decode_page(body, "case")?;
    let rows = page
        .rows
        .into_iter()
        .map(|f| {
            let a = f.attributes;
            Ok(RawCaseEntry {
                district_key: district_key(&a.id_landkreis)?,
                district_name: a.landkreis,
                reported_at_ms: a.meldedatum,
                cases: a.anzahl_fall,
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;

    Ok(Page {
        rows,
        has_more: page.has_more,
    })
}

/// Decode one page of the district reference layer.
pub fn parse_region_page(body: &str) -> Result<Page<Region>, Error> {
    let page: Page<Feature<DistrictAttributes>> = decode_page(body, "district")?;
    let rows = page
        .rows
        .into_iter()
        .map(|f| Region {
            id: f.attributes.rs,
            name: f.attributes.gen,
            district_type: f.attributes.bez,
            state: f.attributes.bl,
            population: f.attributes.ewz,
            coordinates: f.centroid.and_then(Point::to_coordinates),
        })
        .collect();

    Ok(Page {
        rows,
        has_more: page.has_more,
    })
}
