//! Key naming for the flat key-value cache.
//!
//! Every key the builder writes and the query engine reads is produced here. Ids are
//! canonical integers and every segment name is fixed, so two different id tuples can never
//! produce the same key.

use crate::models::occupancy::{HardwareId, ImageId, MapId, SurveyId};

pub const DEFAULT_PREFIX: &str = "occupeye";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    prefix: String,
    versioned: bool,
    generation: Option<u64>,
}

impl KeySchema {
    pub fn new(prefix: impl Into<String>) -> Self {
        KeySchema {
            prefix: prefix.into(),
            versioned: false,
            generation: None,
        }
    }

    /// A schema whose data keys live under a generation pointed to by [`Self::generation_pointer`].
    pub fn versioned(prefix: impl Into<String>) -> Self {
        KeySchema {
            prefix: prefix.into(),
            versioned: true,
            generation: None,
        }
    }

    pub fn is_versioned(&self) -> bool {
        self.versioned
    }

    pub fn generation(&self) -> Option<u64> {
        self.generation
    }

    /// Pin the schema to one generation. Unversioned schemas ignore the pin.
    pub fn at_generation(&self, generation: u64) -> Self {
        KeySchema {
            prefix: self.prefix.clone(),
            versioned: self.versioned,
            generation: self.versioned.then_some(generation),
        }
    }

    fn scoped(&self, rest: &str) -> String {
        match self.generation {
            Some(g) => format!("{}:g{}:{}", self.prefix, g, rest),
            None => format!("{}:{}", self.prefix, rest),
        }
    }

    pub fn generation_pointer(&self) -> String {
        format!("{}:generation", self.prefix)
    }

    pub fn surveys_list(&self) -> String {
        self.scoped("surveys")
    }

    pub fn survey_data(&self, survey: SurveyId) -> String {
        self.scoped(&format!("survey:{survey}"))
    }

    pub fn survey_maps_list(&self, survey: SurveyId) -> String {
        self.scoped(&format!("survey:{survey}:maps"))
    }

    pub fn survey_map_data(&self, survey: SurveyId, map: MapId) -> String {
        self.scoped(&format!("survey:{survey}:map:{map}"))
    }

    pub fn survey_map_sensors_list(&self, survey: SurveyId, map: MapId) -> String {
        self.scoped(&format!("survey:{survey}:map:{map}:sensors"))
    }

    pub fn survey_map_sensor_properties(&self, survey: SurveyId, map: MapId, hardware: HardwareId) -> String {
        self.scoped(&format!("survey:{survey}:map:{map}:sensor:{hardware}"))
    }

    pub fn survey_map_vmax_x(&self, survey: SurveyId, map: MapId) -> String {
        self.scoped(&format!("survey:{survey}:map:{map}:vmax_x"))
    }

    pub fn survey_map_vmax_y(&self, survey: SurveyId, map: MapId) -> String {
        self.scoped(&format!("survey:{survey}:map:{map}:vmax_y"))
    }

    pub fn survey_map_viewbox(&self, survey: SurveyId, map: MapId) -> String {
        self.scoped(&format!("survey:{survey}:map:{map}:viewbox"))
    }

    pub fn survey_map_summary(&self, survey: SurveyId, map: MapId) -> String {
        self.scoped(&format!("survey:{survey}:map:{map}:summary"))
    }

    pub fn survey_sensors_list(&self, survey: SurveyId) -> String {
        self.scoped(&format!("survey:{survey}:sensors"))
    }

    pub fn survey_sensor_data(&self, survey: SurveyId, hardware: HardwareId) -> String {
        self.scoped(&format!("survey:{survey}:sensor:{hardware}"))
    }

    pub fn survey_sensor_status(&self, survey: SurveyId, hardware: HardwareId) -> String {
        self.scoped(&format!("survey:{survey}:sensor:{hardware}:status"))
    }

    pub fn survey_max_timestamp(&self, survey: SurveyId) -> String {
        self.scoped(&format!("survey:{survey}:max_timestamp"))
    }

    pub fn survey_summary(&self, survey: SurveyId) -> String {
        self.scoped(&format!("survey:{survey}:summary"))
    }

    /// Historical buckets are produced on their own cadence and outlive generations.
    pub fn time_averages(&self, survey: SurveyId, window: u32) -> String {
        format!("{}:survey:{}:averages:{}", self.prefix, survey, window)
    }

    pub fn image_base64(&self, image: ImageId) -> String {
        self.scoped(&format!("image:{image}:base64"))
    }

    pub fn image_content_type(&self, image: ImageId) -> String {
        self.scoped(&format!("image:{image}:content_type"))
    }
}

impl Default for KeySchema {
    fn default() -> Self {
        KeySchema::new(DEFAULT_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    /// Every key for one (survey, map, hardware) combination, each paired with the logical
    /// tuple it stands for.
    fn all_keys(k: &KeySchema, s: u64, m: u64, h: u64) -> Vec<(String, String)> {
        let (survey, map, hw) = (SurveyId(s), MapId(m), HardwareId(h));
        vec![
            (k.survey_data(survey), format!("survey {s}")),
            (k.survey_maps_list(survey), format!("maps {s}")),
            (k.survey_map_data(survey, map), format!("map {s} {m}")),
            (k.survey_map_sensors_list(survey, map), format!("map sensors {s} {m}")),
            (k.survey_map_sensor_properties(survey, map, hw), format!("position {s} {m} {h}")),
            (k.survey_map_vmax_x(survey, map), format!("vmax_x {s} {m}")),
            (k.survey_map_vmax_y(survey, map), format!("vmax_y {s} {m}")),
            (k.survey_map_viewbox(survey, map), format!("viewbox {s} {m}")),
            (k.survey_map_summary(survey, map), format!("map summary {s} {m}")),
            (k.survey_sensors_list(survey), format!("sensors {s}")),
            (k.survey_sensor_data(survey, hw), format!("sensor {s} {h}")),
            (k.survey_sensor_status(survey, hw), format!("status {s} {h}")),
            (k.survey_max_timestamp(survey), format!("max timestamp {s}")),
            (k.survey_summary(survey), format!("summary {s}")),
            (k.time_averages(survey, 1), format!("averages {s} 1")),
            (k.image_base64(ImageId(s)), format!("image {s}")),
            (k.image_content_type(ImageId(s)), format!("content type {s}")),
        ]
    }

    #[test]
    fn distinct_tuples_never_collide() {
        let k = KeySchema::default();
        let mut owner: HashMap<String, String> = HashMap::new();
        let mut keys = vec![
            (k.surveys_list(), "surveys".to_string()),
            (k.generation_pointer(), "generation".to_string()),
        ];
        for (s, m, h) in [(1, 1, 1), (1, 11, 1), (11, 1, 1), (1, 1, 11), (9991, 3331, 6666661), (99, 913, 31)] {
            keys.extend(all_keys(&k, s, m, h));
        }
        for (key, tuple) in keys {
            if let Some(previous) = owner.insert(key.clone(), tuple.clone()) {
                assert_eq!(previous, tuple, "{key} is shared");
            }
        }
        let tuples: HashSet<&String> = owner.values().collect();
        assert_eq!(tuples.len(), owner.len());
    }

    #[test]
    fn same_tuple_same_key() {
        let writer = KeySchema::new("occupeye");
        let reader = KeySchema::new("occupeye");
        assert_eq!(
            writer.survey_sensor_status(SurveyId(9991), HardwareId(6666661)),
            reader.survey_sensor_status(SurveyId(9991), HardwareId(6666661))
        );
        assert_eq!(writer.survey_data(SurveyId(9991)), "occupeye:survey:9991");
    }

    #[test]
    fn generations_are_disjoint() {
        let base = KeySchema::versioned("occupeye");
        let g1 = base.at_generation(1);
        let g2 = base.at_generation(2);
        assert_eq!(g1.surveys_list(), "occupeye:g1:surveys");
        assert_ne!(g1.surveys_list(), g2.surveys_list());
        assert_eq!(g1.time_averages(SurveyId(5), 7), g2.time_averages(SurveyId(5), 7));
        assert_eq!(g1.generation_pointer(), g2.generation_pointer());
        assert_eq!(KeySchema::default().at_generation(3).generation(), None);
    }
}
