//! Write side of the cache.
//!
//! A refresh cycle runs in three steps:
//! 1. fetch everything from upstream into a [`Snapshot`] (no store access),
//! 2. stage the snapshot into one [`Batch`], dependencies first,
//! 3. apply the batch.
//!
//! Any upstream failure in step 1 aborts the cycle with the store untouched. Malformed records
//! are dropped (with a warning) while fetching, never half-written.
//!
//! Staging order: images, sensor records and statuses, map records and geometry, survey
//! records, membership lists, precomputed summaries, max timestamps, and last the generation
//! pointer when keys are versioned.

use crate::client::{ClientError, OccupancySource};
use crate::codec::{self, HashRecord};
use crate::keys::KeySchema;
use crate::models::occupancy::{HardwareId, ImageId, MapId, OccupancyCounts, SurveyId, TriggerType, UsageBuckets};
use crate::models::occupeye;
use crate::services::history;
use crate::services::query::{QueryEngine, QueryError};
use crate::store::records::{Location, MapRecord, SensorPosition, SensorRecord, SensorStatus, SurveyRecord};
use crate::store::{Batch, Store, StoreError};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};

const DEFAULT_START_TIME: &str = "00:00";
const DEFAULT_END_TIME: &str = "23:59";

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("upstream: {0}")]
    Upstream(#[from] ClientError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("encoding: {0}")]
    Codec(#[from] codec::CodecError),
    #[error("reading back cache: {0}")]
    Query(#[from] QueryError),
}

#[derive(Debug, Clone, Default)]
pub struct RefreshSettings {
    pub staff_surveys: BTreeSet<u64>,
    pub locations: HashMap<u64, Location>,
    pub key_ttl_secs: Option<u64>,
    pub history_windows: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapSnapshot {
    pub record: MapRecord,
    pub vmax_x: String,
    pub vmax_y: String,
    pub view_box: String,
    pub positions: Vec<SensorPosition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurveySnapshot {
    pub record: SurveyRecord,
    pub maps: Vec<MapSnapshot>,
    pub sensors: Vec<SensorRecord>,
    pub statuses: BTreeMap<HardwareId, SensorStatus>,
    pub max_timestamp: Option<NaiveDateTime>,
}

impl SurveySnapshot {
    /// Counts per map, from the statuses of the sensors placed on that map.
    pub fn map_counts(&self, map: &MapSnapshot) -> OccupancyCounts {
        let mut counts = OccupancyCounts::default();
        for pos in &map.positions {
            if let Some(status) = self.statuses.get(&pos.hardware_id) {
                counts.record(&status.last_trigger_type);
            }
        }
        counts
    }
}

/// Everything one cycle read from upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub surveys: Vec<SurveySnapshot>,
    /// image id → (base64, content type)
    pub images: BTreeMap<ImageId, (String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
    pub surveys: usize,
    pub maps: usize,
    pub sensors: usize,
    pub images: usize,
    pub writes: usize,
    pub generation: Option<u64>,
}

fn survey_record(survey: &occupeye::Survey, settings: &RefreshSettings) -> Result<SurveyRecord, codec::CodecError> {
    let start = survey.start_time.as_deref().unwrap_or(DEFAULT_START_TIME);
    let end = survey.end_time.as_deref().unwrap_or(DEFAULT_END_TIME);
    Ok(SurveyRecord {
        id: SurveyId(survey.survey_id),
        active: survey.active,
        name: survey.name.clone(),
        start_time: codec::decode_time_of_day("start_time", start)?,
        end_time: codec::decode_time_of_day("end_time", end)?,
        staff_survey: settings.staff_surveys.contains(&survey.survey_id),
        location: settings.locations.get(&survey.survey_id).cloned().unwrap_or_default(),
    })
}

fn sensor_record(s: occupeye::SurveySensor) -> SensorRecord {
    SensorRecord {
        hardware_id: HardwareId(s.hardware_id),
        survey_id: SurveyId(s.survey_id),
        survey_device_id: MapId(s.survey_device_id),
        host_address: s.host_address,
        pir_address: s.pir_address,
        device_type: s.device_type,
        location: s.location,
        description_1: s.description_1,
        description_2: s.description_2,
        description_3: s.description_3,
        room_id: s.room_id,
        room_name: s.room_name,
        share_id: s.share_id,
        floor: s.floor,
        room_type: s.room_type,
        building_name: s.building_name,
        room_description: s.room_description,
    }
}

fn fetch_survey<U: OccupancySource>(
    source: &U,
    survey: &occupeye::Survey,
    settings: &RefreshSettings,
    images: &mut BTreeMap<ImageId, (String, String)>,
) -> Result<Option<SurveySnapshot>, ClientError> {
    let record = match survey_record(survey, settings) {
        Ok(r) => r,
        Err(e) => {
            warn!("Skipping survey {}: {}", survey.survey_id, e);
            return Ok(None);
        }
    };
    let survey_id = record.id;

    let mut sensors = Vec::new();
    for s in source.sensors(survey_id.0)? {
        if s.survey_id != survey_id.0 {
            warn!(
                "Skipping sensor {} listed under survey {} but owned by survey {}",
                s.hardware_id, survey_id, s.survey_id
            );
            continue;
        }
        sensors.push(sensor_record(s));
    }
    sensors.sort_by_key(|s| s.hardware_id);
    sensors.dedup_by_key(|s| s.hardware_id);
    let owner: HashMap<HardwareId, MapId> = sensors.iter().map(|s| (s.hardware_id, s.survey_device_id)).collect();

    let mut statuses = BTreeMap::new();
    let mut max_timestamp: Option<NaiveDateTime> = None;
    for st in source.statuses(survey_id.0)? {
        let hardware = HardwareId(st.hardware_id);
        if !owner.contains_key(&hardware) {
            debug!("Ignoring status for unknown sensor {} in survey {}", hardware, survey_id);
            continue;
        }
        let timestamp = match st.last_trigger_time.as_deref().filter(|t| !t.is_empty()) {
            None => None,
            Some(raw) => match codec::parse_timestamp(raw) {
                Some(ts) => {
                    max_timestamp = max_timestamp.max(Some(ts));
                    Some(raw.to_string())
                }
                None => {
                    warn!("Dropping malformed trigger time {:?} for sensor {}", raw, hardware);
                    None
                }
            },
        };
        statuses.insert(
            hardware,
            SensorStatus {
                hardware_id: hardware,
                last_trigger_type: TriggerType::from_raw(st.last_trigger_type.as_deref().unwrap_or_default()),
                last_trigger_timestamp: timestamp,
            },
        );
    }
    // a sensor that never reported still gets a status so readers can count it as "other"
    for s in &sensors {
        statuses.entry(s.hardware_id).or_insert_with(|| SensorStatus {
            hardware_id: s.hardware_id,
            last_trigger_type: TriggerType::from_raw(""),
            last_trigger_timestamp: None,
        });
    }

    let mut maps = Vec::new();
    let mut listings = source.maps(survey_id.0)?;
    listings.sort_by_key(|m| m.map_id);
    listings.dedup_by_key(|m| m.map_id);
    for listing in listings {
        let map = MapId(listing.map_id);
        let detail = source.map_detail(listing.map_id)?;
        let mut positions = Vec::new();
        for item in detail.items {
            let hardware = HardwareId(item.hardware_id);
            match owner.get(&hardware) {
                Some(m) if *m == map => positions.push(SensorPosition {
                    hardware_id: hardware,
                    x_pos: item.x.to_string(),
                    y_pos: item.y.to_string(),
                }),
                Some(m) => warn!("Sensor {} placed on map {} but belongs to map {}", hardware, map, m),
                None => warn!("Map {} places unknown sensor {}", map, hardware),
            }
        }
        positions.sort_by_key(|p| p.hardware_id);
        positions.dedup_by_key(|p| p.hardware_id);

        let image = ImageId(listing.image_id);
        if !images.contains_key(&image) {
            let img = source.image(image.0)?;
            images.insert(image, (STANDARD.encode(&img.bytes), img.content_type));
        }

        maps.push(MapSnapshot {
            record: MapRecord {
                id: map,
                name: listing.map_name,
                image_id: image,
            },
            vmax_x: detail.vmax_x.to_string(),
            vmax_y: detail.vmax_y.to_string(),
            view_box: detail.view_box,
            positions,
        });
    }

    debug!(
        "Fetched survey {} (maps={}, sensors={}, statuses={})",
        survey_id,
        maps.len(),
        sensors.len(),
        statuses.len()
    );
    Ok(Some(SurveySnapshot {
        record,
        maps,
        sensors,
        statuses,
        max_timestamp,
    }))
}

/// Read one full cycle from upstream. Nothing is written.
pub fn fetch_snapshot<U: OccupancySource>(source: &U, settings: &RefreshSettings) -> Result<Snapshot, ClientError> {
    let mut upstream_surveys = source.surveys()?;
    upstream_surveys.sort_by_key(|s| s.survey_id);
    upstream_surveys.dedup_by_key(|s| s.survey_id);

    let mut snapshot = Snapshot::default();
    for survey in &upstream_surveys {
        if let Some(s) = fetch_survey(source, survey, settings, &mut snapshot.images)? {
            snapshot.surveys.push(s);
        }
    }
    Ok(snapshot)
}

/// Stage a snapshot into one batch under `keys`. `previous_max` holds the max timestamps
/// currently stored so they never move backwards.
pub fn stage_snapshot(
    snapshot: &Snapshot,
    keys: &KeySchema,
    ttl: Option<u64>,
    previous_max: &HashMap<SurveyId, NaiveDateTime>,
) -> Batch {
    let mut batch = Batch::with_ttl(ttl);

    for (image, (blob, content_type)) in &snapshot.images {
        batch.set(keys.image_base64(*image), blob.clone());
        batch.set(keys.image_content_type(*image), content_type.clone());
    }

    for s in &snapshot.surveys {
        let survey = s.record.id;
        for sensor in &s.sensors {
            batch.replace_hash(keys.survey_sensor_data(survey, sensor.hardware_id), sensor.to_fields());
        }
        for status in s.statuses.values() {
            batch.replace_hash(keys.survey_sensor_status(survey, status.hardware_id), status.to_fields());
        }
        for map in &s.maps {
            let map_id = map.record.id;
            for pos in &map.positions {
                batch.replace_hash(
                    keys.survey_map_sensor_properties(survey, map_id, pos.hardware_id),
                    pos.to_fields(),
                );
            }
            batch.replace_hash(keys.survey_map_data(survey, map_id), map.record.to_fields());
            batch.set(keys.survey_map_vmax_x(survey, map_id), map.vmax_x.clone());
            batch.set(keys.survey_map_vmax_y(survey, map_id), map.vmax_y.clone());
            batch.set(keys.survey_map_viewbox(survey, map_id), map.view_box.clone());
        }
        batch.replace_hash(keys.survey_data(survey), s.record.to_fields());
    }

    for s in &snapshot.surveys {
        let survey = s.record.id;
        for map in &s.maps {
            batch.replace_list(
                keys.survey_map_sensors_list(survey, map.record.id),
                map.positions.iter().map(|p| p.hardware_id.to_string()).collect(),
            );
        }
        batch.replace_list(
            keys.survey_maps_list(survey),
            s.maps.iter().map(|m| m.record.id.to_string()).collect(),
        );
        batch.replace_list(
            keys.survey_sensors_list(survey),
            s.sensors.iter().map(|x| x.hardware_id.to_string()).collect(),
        );
    }
    batch.replace_list(
        keys.surveys_list(),
        snapshot.surveys.iter().map(|s| s.record.id.to_string()).collect(),
    );

    for s in &snapshot.surveys {
        let survey = s.record.id;
        let mut total = OccupancyCounts::default();
        for map in &s.maps {
            let counts = s.map_counts(map);
            total.absorb(&counts);
            batch.replace_hash(keys.survey_map_summary(survey, map.record.id), counts.to_fields());
        }
        batch.replace_hash(keys.survey_summary(survey), total.to_fields());
    }

    for s in &snapshot.surveys {
        let survey = s.record.id;
        let newest = s.max_timestamp.max(previous_max.get(&survey).copied());
        if let Some(ts) = newest {
            batch.set(keys.survey_max_timestamp(survey), codec::encode_timestamp(ts));
        }
    }

    if let Some(generation) = keys.generation() {
        batch.set_persistent(keys.generation_pointer(), generation.to_string());
    }
    batch
}

pub struct CacheBuilder<S> {
    store: S,
    keys: KeySchema,
    settings: RefreshSettings,
}

impl<S: Store> CacheBuilder<S> {
    pub fn new(store: S, keys: KeySchema, settings: RefreshSettings) -> Self {
        CacheBuilder { store, keys, settings }
    }

    fn current_generation(&mut self) -> Result<Option<u64>, RefreshError> {
        if !self.keys.is_versioned() {
            return Ok(None);
        }
        match self.store.get(&self.keys.generation_pointer())? {
            None => Ok(Some(0)),
            Some(raw) => Ok(Some(codec::decode_int::<u64>("generation", &raw)?)),
        }
    }

    /// Keys currently visible to readers.
    fn live_keys(&mut self) -> Result<KeySchema, RefreshError> {
        Ok(match self.current_generation()? {
            Some(g) if g > 0 => self.keys.at_generation(g),
            _ => self.keys.clone(),
        })
    }

    fn previous_max(&mut self, live: &KeySchema, snapshot: &Snapshot) -> Result<HashMap<SurveyId, NaiveDateTime>, RefreshError> {
        let mut out = HashMap::new();
        for s in &snapshot.surveys {
            if let Some(raw) = self.store.get(&live.survey_max_timestamp(s.record.id))? {
                match codec::parse_timestamp(&raw) {
                    Some(ts) => {
                        out.insert(s.record.id, ts);
                    }
                    None => warn!("Ignoring malformed stored max timestamp {:?} for survey {}", raw, s.record.id),
                }
            }
        }
        Ok(out)
    }

    /// Ids stored in a list, skipping entries that are not ids.
    fn stored_ids(&mut self, key: &str) -> Result<Vec<u64>, RefreshError> {
        Ok(self
            .store
            .list(key)?
            .iter()
            .filter_map(|raw| codec::decode_int::<u64>("id", raw).ok())
            .collect())
    }

    /// Delete every key of one survey, following its stored lists. Images of its maps go too
    /// unless `kept_images` still references them.
    fn stage_survey_purge(
        &mut self,
        batch: &mut Batch,
        survey: SurveyId,
        kept_images: &BTreeMap<ImageId, (String, String)>,
    ) -> Result<(), RefreshError> {
        let keys = self.keys.clone();
        for map in self.stored_ids(&keys.survey_maps_list(survey))?.into_iter().map(MapId) {
            if let Some(fields) = self.store.hash(&keys.survey_map_data(survey, map))? {
                if let Some(image) = fields.get("image_id").and_then(|raw| raw.parse::<u64>().ok()).map(ImageId) {
                    if !kept_images.contains_key(&image) {
                        batch.delete(keys.image_base64(image));
                        batch.delete(keys.image_content_type(image));
                    }
                }
            }
            for hardware in self.stored_ids(&keys.survey_map_sensors_list(survey, map))? {
                batch.delete(keys.survey_map_sensor_properties(survey, map, HardwareId(hardware)));
            }
            batch.delete(keys.survey_map_data(survey, map));
            batch.delete(keys.survey_map_sensors_list(survey, map));
            batch.delete(keys.survey_map_vmax_x(survey, map));
            batch.delete(keys.survey_map_vmax_y(survey, map));
            batch.delete(keys.survey_map_viewbox(survey, map));
            batch.delete(keys.survey_map_summary(survey, map));
        }
        for hardware in self.stored_ids(&keys.survey_sensors_list(survey))?.into_iter().map(HardwareId) {
            batch.delete(keys.survey_sensor_data(survey, hardware));
            batch.delete(keys.survey_sensor_status(survey, hardware));
        }
        for window in &self.settings.history_windows {
            batch.delete(keys.time_averages(survey, *window));
        }
        batch.delete(keys.survey_data(survey));
        batch.delete(keys.survey_maps_list(survey));
        batch.delete(keys.survey_sensors_list(survey));
        batch.delete(keys.survey_summary(survey));
        batch.delete(keys.survey_max_timestamp(survey));
        Ok(())
    }

    /// In-place mode only: all keys of surveys that disappeared upstream.
    fn stage_removals(&mut self, batch: &mut Batch, snapshot: &Snapshot) -> Result<usize, RefreshError> {
        if self.keys.is_versioned() {
            return Ok(0);
        }
        let kept: BTreeSet<SurveyId> = snapshot.surveys.iter().map(|s| s.record.id).collect();
        let mut removed = 0;
        let listed = self.keys.surveys_list();
        for survey in self.stored_ids(&listed)?.into_iter().map(SurveyId) {
            if kept.contains(&survey) {
                continue;
            }
            self.stage_survey_purge(batch, survey, &snapshot.images)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Run one full refresh cycle.
    pub fn refresh<U: OccupancySource>(&mut self, source: &U) -> Result<RefreshReport, RefreshError> {
        info!("Refresh: fetching from upstream");
        let snapshot = fetch_snapshot(source, &self.settings)?;
        self.write_snapshot(&snapshot)
    }

    /// Stage and apply an already fetched snapshot.
    pub fn write_snapshot(&mut self, snapshot: &Snapshot) -> Result<RefreshReport, RefreshError> {
        let live = self.live_keys()?;
        let previous_max = self.previous_max(&live, snapshot)?;
        let generation = self.current_generation()?.map(|g| g + 1);
        let target = match generation {
            Some(g) => self.keys.at_generation(g),
            None => self.keys.clone(),
        };

        let mut batch = stage_snapshot(snapshot, &target, self.settings.key_ttl_secs, &previous_max);
        let removed = self.stage_removals(&mut batch, snapshot)?;
        if removed > 0 {
            info!("Refresh: removing {} survey(s) no longer listed upstream", removed);
        }

        let report = RefreshReport {
            surveys: snapshot.surveys.len(),
            maps: snapshot.surveys.iter().map(|s| s.maps.len()).sum(),
            sensors: snapshot.surveys.iter().map(|s| s.sensors.len()).sum(),
            images: snapshot.images.len(),
            writes: batch.len(),
            generation,
        };
        self.store.apply(&batch)?;
        info!(
            "Refresh: wrote surveys={}, maps={}, sensors={}, images={} ({} ops{})",
            report.surveys,
            report.maps,
            report.sensors,
            report.images,
            report.writes,
            generation.map(|g| format!(", generation {g}")).unwrap_or_default()
        );
        Ok(report)
    }

    /// Recompute per-map and per-survey summaries from what is stored now.
    pub fn cache_common_summaries(&mut self) -> Result<usize, RefreshError> {
        let live = self.live_keys()?;
        let survey_ids = self
            .store
            .list(&live.surveys_list())?
            .iter()
            .map(|raw| codec::decode_int::<u64>("id", raw))
            .collect::<Result<BTreeSet<_>, _>>()?;

        let mut batch = Batch::with_ttl(self.settings.key_ttl_secs);
        {
            let mut engine = QueryEngine::new(&mut self.store, live.clone(), Vec::new());
            for id in &survey_ids {
                let record = match engine.survey_record(&live, SurveyId(*id))? {
                    Some(r) => r,
                    None => continue,
                };
                let summary = engine.summarise(&live, record)?;
                for map in &summary.maps {
                    batch.replace_hash(live.survey_map_summary(summary.id, map.id), map.counts.to_fields());
                }
                batch.replace_hash(live.survey_summary(summary.id), summary.counts.to_fields());
            }
        }
        self.store.apply(&batch)?;
        debug!("Cached summaries for {} survey(s)", survey_ids.len());
        Ok(survey_ids.len())
    }

    /// Store precomputed buckets for one survey and window, as handed over by an aggregation job.
    /// Buckets never expire: they are replaced on their own daily cadence.
    pub fn store_time_averages(&mut self, survey: SurveyId, window: u32, buckets: &UsageBuckets) -> Result<(), RefreshError> {
        let mut batch = Batch::new();
        batch.set(self.keys.time_averages(survey, window), codec::encode_json(buckets)?);
        self.store.apply(&batch)?;
        Ok(())
    }

    /// Fetch per-slot history for every listed survey and configured window, average it and
    /// write the buckets. All fetching happens before the single write.
    pub fn cache_time_averages<U: OccupancySource>(&mut self, source: &U, today: NaiveDate) -> Result<usize, RefreshError> {
        let live = self.live_keys()?;
        let survey_ids = self
            .store
            .list(&live.surveys_list())?
            .iter()
            .map(|raw| codec::decode_int::<u64>("id", raw))
            .collect::<Result<BTreeSet<_>, _>>()?;

        let mut staged = Vec::new();
        for id in &survey_ids {
            for window in &self.settings.history_windows {
                let (from, to) = history::window_range(today, *window);
                let rows = source.usage(*id, from, to)?;
                let buckets = history::average_by_slot(&rows, from, to);
                debug!("History: survey {} window {} → {} slot(s)", id, window, buckets.len());
                staged.push((SurveyId(*id), *window, buckets));
            }
        }

        // no expiry, see `store_time_averages`
        let mut batch = Batch::new();
        for (survey, window, buckets) in &staged {
            batch.set(self.keys.time_averages(*survey, *window), codec::encode_json(buckets)?);
        }
        self.store.apply(&batch)?;
        info!("History: wrote {} bucket map(s)", staged.len());
        Ok(staged.len())
    }
}
