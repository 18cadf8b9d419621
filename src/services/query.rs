//! Read side of the cache: validates caller input, reads the flat keys and rebuilds the nested
//! survey → map → sensor views.
//!
//! Input is validated before the store is touched. Errors keep three caller mistakes apart:
//! malformed input, a well-formed id with nothing behind it, and an audience that does not
//! match the survey. Store failures surface as [`QueryError::Unavailable`], never as empty data.
//!
//! Output order never depends on the store's list order: ids are sorted ascending.

use crate::codec::{self, CodecError, HashRecord};
use crate::keys::KeySchema;
use crate::models::occupancy::{
    Audience, HardwareId, ImageId, MapId, OccupancyCounts, SurveyFilter, SurveyId, UsageBuckets,
};
use crate::store::records::{Location, MapRecord, SensorPosition, SensorRecord, SensorStatus, SurveyRecord};
use crate::store::{Store, StoreError};
use crate::utils::{parse_id, parse_id_list};
use log::{debug, warn};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("malformed {what}: {value:?}")]
    Malformed { what: &'static str, value: String },
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: String },
    #[error("survey {survey_id} is not a {audience} survey")]
    AudienceMismatch { survey_id: SurveyId, audience: Audience },
    #[error("store unavailable: {0}")]
    Unavailable(#[from] StoreError),
    #[error("corrupt value at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: CodecError,
    },
    /// A key references another that is missing, e.g. while a refresh is half applied.
    #[error("inconsistent cache: {0}")]
    Inconsistent(String),
}

impl QueryError {
    /// Only I/O-shaped failures may succeed on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueryError::Unavailable(_) | QueryError::Inconsistent(_))
    }
}

fn malformed(what: &'static str, value: &str) -> QueryError {
    QueryError::Malformed {
        what,
        value: value.to_string(),
    }
}

fn not_found(what: &'static str, id: impl ToString) -> QueryError {
    QueryError::NotFound {
        what,
        id: id.to_string(),
    }
}

fn parse_audience_request(survey_ids: &str, audience: &str) -> Result<(Audience, Vec<u64>), QueryError> {
    let audience = Audience::parse(audience).ok_or_else(|| malformed("audience", audience))?;
    let ids = parse_id_list(survey_ids).map_err(|bad| malformed("survey id", &bad))?;
    Ok((audience, ids))
}

// =====================
// Views
// =====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapView {
    pub id: MapId,
    pub name: String,
    pub image_id: ImageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurveyView {
    pub id: SurveyId,
    pub name: String,
    pub active: bool,
    pub start_time: String,
    pub end_time: String,
    pub staff_survey: bool,
    pub location: Location,
    pub maps: Vec<MapView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorView {
    pub x_pos: String,
    pub y_pos: String,
    #[serde(flatten)]
    pub sensor: SensorRecord,
    pub last_trigger_type: String,
    pub last_trigger_timestamp: Option<String>,
    pub occupied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapSensorsView {
    pub id: MapId,
    pub name: String,
    pub image_id: ImageId,
    pub sensors: BTreeMap<HardwareId, SensorView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurveySensorsView {
    pub survey_id: SurveyId,
    pub survey_name: String,
    pub most_recent_timestamp: Option<String>,
    pub maps: Vec<MapSensorsView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapSummary {
    pub id: MapId,
    pub name: String,
    #[serde(flatten)]
    pub counts: OccupancyCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurveySummary {
    pub id: SurveyId,
    pub name: String,
    pub staff_survey: bool,
    #[serde(flatten)]
    pub counts: OccupancyCounts,
    pub maps: Vec<MapSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoricalUsage {
    pub survey_id: SurveyId,
    pub name: String,
    pub averages: UsageBuckets,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageMapData {
    #[serde(rename = "VMaxX")]
    pub vmax_x: String,
    #[serde(rename = "VMaxY")]
    pub vmax_y: String,
    #[serde(rename = "ViewBox")]
    pub view_box: String,
}

// =====================
// Engine
// =====================

pub struct QueryEngine<S> {
    store: S,
    keys: KeySchema,
    history_windows: Vec<u32>,
}

impl<S: Store> QueryEngine<S> {
    pub fn new(store: S, keys: KeySchema, history_windows: Vec<u32>) -> Self {
        QueryEngine {
            store,
            keys,
            history_windows,
        }
    }

    /// Keys for this read. With versioning on, the generation pointer is read once so every key
    /// of one operation comes from the same generation.
    fn schema(&mut self) -> Result<KeySchema, QueryError> {
        if !self.keys.is_versioned() {
            return Ok(self.keys.clone());
        }
        let pointer = self.keys.generation_pointer();
        match self.store.get(&pointer)? {
            None => Ok(self.keys.clone()),
            Some(raw) => {
                let generation = codec::decode_int::<u64>("generation", &raw).map_err(|source| QueryError::Corrupt {
                    key: pointer.clone(),
                    source,
                })?;
                Ok(self.keys.at_generation(generation))
            }
        }
    }

    fn record<R: HashRecord>(&mut self, key: &str) -> Result<Option<R>, QueryError> {
        match self.store.hash(key)? {
            None => Ok(None),
            Some(fields) => R::from_fields(&fields).map(Some).map_err(|source| QueryError::Corrupt {
                key: key.to_string(),
                source,
            }),
        }
    }

    /// A record some other key points at. Its absence means the cache is mid-refresh or broken.
    fn referenced<R: HashRecord>(&mut self, key: &str) -> Result<R, QueryError> {
        self.record(key)?.ok_or_else(|| {
            warn!("Dangling reference: {} is missing", key);
            QueryError::Inconsistent(format!("{key} is referenced but missing"))
        })
    }

    fn referenced_value(&mut self, key: &str) -> Result<String, QueryError> {
        self.store.get(key)?.ok_or_else(|| {
            warn!("Dangling reference: {} is missing", key);
            QueryError::Inconsistent(format!("{key} is referenced but missing"))
        })
    }

    /// Stored id list, ascending and de-duplicated.
    fn id_list(&mut self, key: &str) -> Result<Vec<u64>, QueryError> {
        let mut ids = self
            .store
            .list(key)?
            .iter()
            .map(|raw| {
                codec::decode_int::<u64>("id", raw).map_err(|source| QueryError::Corrupt {
                    key: key.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    pub(crate) fn survey_record(&mut self, keys: &KeySchema, survey: SurveyId) -> Result<Option<SurveyRecord>, QueryError> {
        self.record(&keys.survey_data(survey))
    }

    fn has_survey(&mut self, keys: &KeySchema, survey: SurveyId) -> Result<bool, QueryError> {
        Ok(self.id_list(&keys.surveys_list())?.contains(&survey.0))
    }

    fn has_map(&mut self, keys: &KeySchema, survey: SurveyId, map: MapId) -> Result<bool, QueryError> {
        Ok(self.has_survey(keys, survey)? && self.id_list(&keys.survey_maps_list(survey))?.contains(&map.0))
    }

    fn existing_survey(&mut self, keys: &KeySchema, survey: SurveyId) -> Result<SurveyRecord, QueryError> {
        if !self.has_survey(keys, survey)? {
            return Err(not_found("survey", survey));
        }
        self.referenced(&keys.survey_data(survey))
    }

    /// Existence of every survey, then its audience. Syntax was checked by
    /// [`parse_audience_request`] before the store was touched.
    fn surveys_for_audience(
        &mut self,
        keys: &KeySchema,
        audience: Audience,
        ids: Vec<u64>,
    ) -> Result<Vec<SurveyRecord>, QueryError> {
        let mut surveys = Vec::with_capacity(ids.len());
        for id in ids {
            surveys.push(self.existing_survey(keys, SurveyId(id))?);
        }
        if let Some(wrong) = surveys.iter().find(|s| !audience.admits(s.staff_survey)) {
            return Err(QueryError::AudienceMismatch {
                survey_id: wrong.id,
                audience,
            });
        }
        Ok(surveys)
    }

    pub fn survey_exists(&mut self, survey_id: &str) -> Result<bool, QueryError> {
        let survey = parse_id(survey_id).ok_or_else(|| malformed("survey id", survey_id))?;
        let keys = self.schema()?;
        self.has_survey(&keys, SurveyId(survey))
    }

    pub fn map_exists(&mut self, survey_id: &str, map_id: &str) -> Result<bool, QueryError> {
        let survey = parse_id(survey_id).ok_or_else(|| malformed("survey id", survey_id))?;
        let map = parse_id(map_id).ok_or_else(|| malformed("map id", map_id))?;
        let keys = self.schema()?;
        self.has_map(&keys, SurveyId(survey), MapId(map))
    }

    pub fn list_surveys(&mut self, filter: &str) -> Result<Vec<SurveyView>, QueryError> {
        let filter = SurveyFilter::parse(filter).ok_or_else(|| malformed("survey filter", filter))?;
        let keys = self.schema()?;
        let mut surveys = Vec::new();
        for id in self.id_list(&keys.surveys_list())? {
            let survey = SurveyId(id);
            let record: SurveyRecord = self.referenced(&keys.survey_data(survey))?;
            if !filter.admits(record.staff_survey) {
                continue;
            }
            let mut maps = Vec::new();
            for map_id in self.id_list(&keys.survey_maps_list(survey))? {
                let map: MapRecord = self.referenced(&keys.survey_map_data(survey, MapId(map_id)))?;
                maps.push(MapView {
                    id: map.id,
                    name: map.name,
                    image_id: map.image_id,
                });
            }
            surveys.push(SurveyView {
                id: record.id,
                name: record.name,
                active: record.active,
                start_time: record.start_time,
                end_time: record.end_time,
                staff_survey: record.staff_survey,
                location: record.location,
                maps,
            });
        }
        debug!("Listed {} survey(s)", surveys.len());
        Ok(surveys)
    }

    /// Base64 image and its content type.
    pub fn get_image(&mut self, image_id: &str) -> Result<(String, String), QueryError> {
        let image = ImageId(parse_id(image_id).ok_or_else(|| malformed("image id", image_id))?);
        let keys = self.schema()?;
        let blob = self
            .store
            .get(&keys.image_base64(image))?
            .ok_or_else(|| not_found("image", image))?;
        let content_type = self.referenced_value(&keys.image_content_type(image))?;
        Ok((blob, content_type))
    }

    pub fn get_survey_sensors(&mut self, survey_id: &str) -> Result<SurveySensorsView, QueryError> {
        let survey = SurveyId(parse_id(survey_id).ok_or_else(|| malformed("survey id", survey_id))?);
        let keys = self.schema()?;
        let record = self.existing_survey(&keys, survey)?;
        let most_recent_timestamp = self.store.get(&keys.survey_max_timestamp(survey))?;

        let mut maps = Vec::new();
        for map_id in self.id_list(&keys.survey_maps_list(survey))? {
            let map = MapId(map_id);
            let map_record: MapRecord = self.referenced(&keys.survey_map_data(survey, map))?;
            let mut sensors = BTreeMap::new();
            for hw in self.id_list(&keys.survey_map_sensors_list(survey, map))? {
                let hardware = HardwareId(hw);
                let position: SensorPosition =
                    self.referenced(&keys.survey_map_sensor_properties(survey, map, hardware))?;
                let sensor: SensorRecord = self.referenced(&keys.survey_sensor_data(survey, hardware))?;
                let status: SensorStatus = self.referenced(&keys.survey_sensor_status(survey, hardware))?;
                if sensor.survey_id != survey || sensor.survey_device_id != map {
                    return Err(QueryError::Inconsistent(format!(
                        "sensor {hardware} listed on survey {survey} map {map} belongs to survey {} map {}",
                        sensor.survey_id, sensor.survey_device_id
                    )));
                }
                sensors.insert(
                    hardware,
                    SensorView {
                        x_pos: position.x_pos,
                        y_pos: position.y_pos,
                        sensor,
                        occupied: status.occupied(),
                        last_trigger_type: status.last_trigger_type.as_str().to_string(),
                        last_trigger_timestamp: status.last_trigger_timestamp,
                    },
                );
            }
            maps.push(MapSensorsView {
                id: map_record.id,
                name: map_record.name,
                image_id: map_record.image_id,
                sensors,
            });
        }

        Ok(SurveySensorsView {
            survey_id: survey,
            survey_name: record.name,
            most_recent_timestamp,
            maps,
        })
    }

    pub fn get_max_survey_timestamp(&mut self, survey_id: &str) -> Result<(SurveyId, String), QueryError> {
        let survey = SurveyId(parse_id(survey_id).ok_or_else(|| malformed("survey id", survey_id))?);
        let keys = self.schema()?;
        if !self.has_survey(&keys, survey)? {
            return Err(not_found("survey", survey));
        }
        let timestamp = self
            .store
            .get(&keys.survey_max_timestamp(survey))?
            .ok_or_else(|| not_found("timestamp for survey", survey))?;
        Ok((survey, timestamp))
    }

    /// Absent / occupied / other counts per map and per survey, computed from sensor statuses.
    pub fn get_survey_sensors_summary(&mut self, survey_ids: &str, audience: &str) -> Result<Vec<SurveySummary>, QueryError> {
        let (audience, ids) = parse_audience_request(survey_ids, audience)?;
        let keys = self.schema()?;
        let surveys = self.surveys_for_audience(&keys, audience, ids)?;
        surveys
            .into_iter()
            .map(|record| self.summarise(&keys, record))
            .collect()
    }

    pub(crate) fn summarise(&mut self, keys: &KeySchema, record: SurveyRecord) -> Result<SurveySummary, QueryError> {
        let survey = record.id;
        let mut total = OccupancyCounts::default();
        let mut maps = Vec::new();
        for map_id in self.id_list(&keys.survey_maps_list(survey))? {
            let map = MapId(map_id);
            let map_record: MapRecord = self.referenced(&keys.survey_map_data(survey, map))?;
            let mut counts = OccupancyCounts::default();
            for hw in self.id_list(&keys.survey_map_sensors_list(survey, map))? {
                let status: SensorStatus = self.referenced(&keys.survey_sensor_status(survey, HardwareId(hw)))?;
                counts.record(&status.last_trigger_type);
            }
            total.absorb(&counts);
            maps.push(MapSummary {
                id: map_record.id,
                name: map_record.name,
                counts,
            });
        }
        Ok(SurveySummary {
            id: survey,
            name: record.name,
            staff_survey: record.staff_survey,
            counts: total,
            maps,
        })
    }

    /// Counts written by the last refresh. Cheaper than [`Self::get_survey_sensors_summary`]
    /// but only as fresh as that refresh; the on-demand summary is the authoritative one.
    pub fn cached_survey_summary(&mut self, survey_id: &str) -> Result<Option<OccupancyCounts>, QueryError> {
        let survey = SurveyId(parse_id(survey_id).ok_or_else(|| malformed("survey id", survey_id))?);
        let keys = self.schema()?;
        if !self.has_survey(&keys, survey)? {
            return Err(not_found("survey", survey));
        }
        self.record(&keys.survey_summary(survey))
    }

    /// Precomputed time-of-day buckets for `window`, returned as stored.
    pub fn get_historical_time_usage_data(
        &mut self,
        survey_ids: &str,
        window: u32,
        audience: &str,
    ) -> Result<Vec<HistoricalUsage>, QueryError> {
        if !self.history_windows.contains(&window) {
            return Err(malformed("averaging window", &window.to_string()));
        }
        let (audience, ids) = parse_audience_request(survey_ids, audience)?;
        let keys = self.schema()?;
        let surveys = self.surveys_for_audience(&keys, audience, ids)?;
        let mut out = Vec::with_capacity(surveys.len());
        for record in surveys {
            let key = keys.time_averages(record.id, window);
            let raw = self
                .store
                .get(&key)?
                .ok_or_else(|| not_found("historical data for survey", format!("{} window {}", record.id, window)))?;
            let averages = codec::decode_json::<UsageBuckets>(&raw).map_err(|source| QueryError::Corrupt { key, source })?;
            out.push(HistoricalUsage {
                survey_id: record.id,
                name: record.name,
                averages,
            });
        }
        Ok(out)
    }

    /// Geometry needed to place sensor dots on a map image.
    pub fn get_survey_image_map_data(&mut self, survey_id: &str, map_id: &str) -> Result<ImageMapData, QueryError> {
        let survey = SurveyId(parse_id(survey_id).ok_or_else(|| malformed("survey id", survey_id))?);
        let map = MapId(parse_id(map_id).ok_or_else(|| malformed("map id", map_id))?);
        let keys = self.schema()?;
        if !self.has_survey(&keys, survey)? {
            return Err(not_found("survey", survey));
        }
        if !self.id_list(&keys.survey_maps_list(survey))?.contains(&map.0) {
            return Err(not_found("map", map));
        }
        Ok(ImageMapData {
            vmax_x: self.referenced_value(&keys.survey_map_vmax_x(survey, map))?,
            vmax_y: self.referenced_value(&keys.survey_map_vmax_y(survey, map))?,
            view_box: self.referenced_value(&keys.survey_map_viewbox(survey, map))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::{Batch, WriteOp};
    use crate::test_support::{PIXEL_PNG, fixture_batch, fixture_buckets, seeded_store};
    use rstest::rstest;

    fn engine() -> QueryEngine<MemoryStore> {
        QueryEngine::new(seeded_store(), KeySchema::default(), vec![1, 7, 30])
    }

    #[rstest]
    #[case("9991", true)]
    #[case("9993", true)]
    #[case("9990", false)]
    fn survey_existence(#[case] id: &str, #[case] expected: bool) {
        assert_eq!(engine().survey_exists(id).expect("exists"), expected);
    }

    #[rstest]
    #[case("9991", "3331", true)]
    #[case("9991", "3330", false)]
    #[case("9990", "3331", false)]
    #[case("9992", "3331", false)]
    fn map_existence(#[case] survey: &str, #[case] map: &str, #[case] expected: bool) {
        assert_eq!(engine().map_exists(survey, map).expect("exists"), expected);
    }

    #[test]
    fn malformed_ids_never_touch_the_store() {
        let mut q = engine();
        q.store.set_unavailable(true);
        assert!(matches!(q.survey_exists("abc"), Err(QueryError::Malformed { .. })));
        assert!(matches!(q.map_exists("9991", "x"), Err(QueryError::Malformed { .. })));
        assert!(matches!(q.get_image("hello_world"), Err(QueryError::Malformed { .. })));
        assert!(matches!(
            q.get_survey_sensors_summary("9991,abc", "student"),
            Err(QueryError::Malformed { .. })
        ));
        assert!(matches!(
            q.get_survey_sensors_summary("9991", "nobody"),
            Err(QueryError::Malformed { .. })
        ));
    }

    #[test]
    fn lists_all_surveys_ascending_with_locations_and_maps() {
        let surveys = engine().list_surveys("all").expect("list");
        let ids = surveys.iter().map(|s| s.id.0).collect::<Vec<_>>();
        assert_eq!(ids, vec![9991, 9992, 9993]);

        let first = &surveys[0];
        assert_eq!(first.name, "test survey 1");
        assert!(first.active);
        assert!(!first.staff_survey);
        assert_eq!(first.start_time, "10:00");
        assert_eq!(first.location.coordinates.lat, "3.14159");
        assert_eq!(first.location.coordinates.lng, "-0.500100");
        assert_eq!(first.location.address[0], "some building");
        assert_eq!(
            first.maps,
            vec![MapView {
                id: MapId(3331),
                name: "E&ET".to_string(),
                image_id: ImageId(1115),
            }]
        );
        assert!(surveys[1].maps.is_empty());
        assert!(!surveys[1].active);
        assert_eq!(surveys[2].location.address[3], "postcode please3");
    }

    #[rstest]
    #[case("student", vec![9991, 9993])]
    #[case("staff", vec![9992])]
    fn lists_by_audience(#[case] filter: &str, #[case] expected: Vec<u64>) {
        let ids = engine()
            .list_surveys(filter)
            .expect("list")
            .iter()
            .map(|s| s.id.0)
            .collect::<Vec<_>>();
        assert_eq!(ids, expected);
    }

    #[test]
    fn unknown_filter_is_malformed() {
        assert!(matches!(engine().list_surveys("everyone"), Err(QueryError::Malformed { .. })));
    }

    #[test]
    fn images() {
        let mut q = engine();
        assert_eq!(
            q.get_image("9991").expect("image"),
            (PIXEL_PNG.to_string(), "image/png".to_string())
        );
        assert!(matches!(q.get_image("99999999999"), Err(QueryError::NotFound { .. })));
    }

    #[test]
    fn survey_sensors_nest_maps_and_sensors() {
        let view = engine().get_survey_sensors("9991").expect("sensors");
        assert_eq!(view.survey_name, "test survey 1");
        assert_eq!(view.most_recent_timestamp.as_deref(), Some("2020-11-12T00:55:16"));
        assert_eq!(view.maps.len(), 1);
        let map = &view.maps[0];
        assert_eq!(map.name, "E&ET");
        let sensor = &map.sensors[&HardwareId(6666661)];
        assert_eq!(sensor.x_pos, "123.0");
        assert_eq!(sensor.y_pos, "321.0");
        assert_eq!(sensor.sensor.room_name, "B1.07");
        assert_eq!(sensor.sensor.share_id, "None");
        assert_eq!(sensor.last_trigger_type, "Absent");
        assert_eq!(
            sensor.last_trigger_timestamp.as_deref(),
            Some("2020-10-16T09:38:22+01:00")
        );
        assert!(!sensor.occupied);

        let empty = engine().get_survey_sensors("9992").expect("sensors");
        assert!(empty.maps.is_empty());
        assert_eq!(empty.most_recent_timestamp, None);
    }

    #[test]
    fn max_timestamp() {
        let mut q = engine();
        assert_eq!(
            q.get_max_survey_timestamp("9991").expect("timestamp"),
            (SurveyId(9991), "2020-11-12T00:55:16".to_string())
        );
        assert!(matches!(q.get_max_survey_timestamp("9990"), Err(QueryError::NotFound { .. })));
        assert!(matches!(q.get_max_survey_timestamp("9992"), Err(QueryError::NotFound { .. })));
    }

    #[test]
    fn summary_counts_absent_sensors() {
        let summaries = engine().get_survey_sensors_summary("9991", "student").expect("summary");
        assert_eq!(summaries.len(), 1);
        let s = &summaries[0];
        assert_eq!(s.name, "test survey 1");
        assert_eq!(
            s.counts,
            OccupancyCounts {
                sensors_absent: 1,
                sensors_occupied: 0,
                sensors_other: 0,
            }
        );
        assert_eq!(s.maps.len(), 1);
        assert_eq!(s.maps[0].counts.sensors_absent, 1);
    }

    #[test]
    fn summary_of_several_surveys_is_ascending() {
        let summaries = engine()
            .get_survey_sensors_summary("9993,9991", "student")
            .expect("summary");
        let ids = summaries.iter().map(|s| s.id.0).collect::<Vec<_>>();
        assert_eq!(ids, vec![9991, 9993]);
        assert_eq!(summaries[1].counts.total(), 0);
        assert!(summaries[1].maps.is_empty());
    }

    #[rstest]
    #[case("9991,9992", "student", 9992)]
    #[case("9991,9992", "staff", 9991)]
    #[case("9991", "staff", 9991)]
    #[case("9992", "student", 9992)]
    fn summary_audience_mismatch(#[case] ids: &str, #[case] audience: &str, #[case] wrong: u64) {
        match engine().get_survey_sensors_summary(ids, audience) {
            Err(QueryError::AudienceMismatch { survey_id, .. }) => assert_eq!(survey_id, SurveyId(wrong)),
            other => panic!("expected audience mismatch, got {other:?}"),
        }
    }

    #[test]
    fn summary_of_unknown_survey_is_not_found() {
        assert!(matches!(
            engine().get_survey_sensors_summary("9990", "student"),
            Err(QueryError::NotFound { .. })
        ));
    }

    #[test]
    fn historical_buckets_are_returned_as_stored() {
        let data = engine()
            .get_historical_time_usage_data("9991", 1, "student")
            .expect("history");
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].averages, fixture_buckets());
    }

    #[test]
    fn historical_errors() {
        let mut q = engine();
        assert!(matches!(
            q.get_historical_time_usage_data("9991", 2, "student"),
            Err(QueryError::Malformed { .. })
        ));
        assert!(matches!(
            q.get_historical_time_usage_data("9991", 7, "student"),
            Err(QueryError::NotFound { .. })
        ));
        assert!(matches!(
            q.get_historical_time_usage_data("9992", 1, "student"),
            Err(QueryError::AudienceMismatch { .. })
        ));
    }

    #[test]
    fn image_map_data() {
        let mut q = engine();
        assert_eq!(
            q.get_survey_image_map_data("9991", "3331").expect("map data"),
            ImageMapData {
                vmax_x: "123".to_string(),
                vmax_y: "321".to_string(),
                view_box: "0 0 1234 4321".to_string(),
            }
        );
        assert!(matches!(
            q.get_survey_image_map_data("9991", "3330"),
            Err(QueryError::NotFound { .. })
        ));
        assert!(matches!(
            q.get_survey_image_map_data("9990", "3331"),
            Err(QueryError::NotFound { .. })
        ));
    }

    #[test]
    fn image_map_data_serialises_with_upstream_names() {
        let data = engine().get_survey_image_map_data("9991", "3331").expect("map data");
        let json = serde_json::to_value(&data).expect("json");
        assert_eq!(json["VMaxX"], "123");
        assert_eq!(json["ViewBox"], "0 0 1234 4321");
    }

    #[test]
    fn store_failure_is_unavailable_not_empty() {
        let mut q = engine();
        q.store.set_unavailable(true);
        let err = q.list_surveys("all").expect_err("store is down");
        assert!(matches!(err, QueryError::Unavailable(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn dangling_reference_is_inconsistent() {
        let mut store = seeded_store();
        let mut batch = Batch::new();
        batch.delete(KeySchema::default().survey_data(SurveyId(9993)));
        store.apply(&batch).expect("apply");
        let err = QueryEngine::new(store, KeySchema::default(), vec![1])
            .list_surveys("all")
            .expect_err("dangling");
        assert!(matches!(err, QueryError::Inconsistent(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn corrupt_record_names_the_key() {
        let mut store = seeded_store();
        let key = KeySchema::default().survey_data(SurveyId(9992));
        let mut batch = Batch::new();
        batch.replace_hash(key.clone(), vec![("id", "9992".to_string()), ("active", "maybe".to_string())]);
        store.apply(&batch).expect("apply");
        match QueryEngine::new(store, KeySchema::default(), vec![1]).list_surveys("staff") {
            Err(QueryError::Corrupt { key: k, .. }) => assert_eq!(k, key),
            other => panic!("expected corrupt, got {other:?}"),
        }
    }

    #[test]
    fn versioned_reads_follow_the_generation_pointer() {
        let keys = KeySchema::versioned("occupeye");
        let mut store = MemoryStore::new();
        let mut batch = fixture_batch(&keys.at_generation(4));
        batch.set_persistent(keys.generation_pointer(), "4".to_string());
        store.apply(&batch).expect("apply");
        assert!(
            batch
                .ops()
                .iter()
                .any(|op| matches!(op, WriteOp::LPush(k, _) if k == "occupeye:g4:surveys"))
        );

        let mut q = QueryEngine::new(store, keys, vec![1]);
        assert!(q.survey_exists("9991").expect("exists"));
        assert_eq!(q.list_surveys("all").expect("list").len(), 3);
        assert_eq!(q.get_historical_time_usage_data("9991", 1, "student").expect("history").len(), 1);
    }
}
