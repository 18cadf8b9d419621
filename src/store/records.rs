//! Records stored as field-named hashes.

use crate::codec::{
    self, CodecError, FieldMap, HashRecord, decode_bool, decode_decimal, decode_int, decode_time_of_day,
    decode_timestamp, encode_bool, field, text,
};
use crate::models::occupancy::{HardwareId, ImageId, MapId, OccupancyCounts, SurveyId, TriggerType};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Coordinates {
    pub lat: String,
    pub lng: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub coordinates: Coordinates,
    pub address: [String; 4],
}

impl Default for Location {
    fn default() -> Self {
        Location {
            coordinates: Coordinates {
                lat: "0".to_string(),
                lng: "0".to_string(),
            },
            address: Default::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurveyRecord {
    pub id: SurveyId,
    pub active: bool,
    pub name: String,
    pub start_time: String,
    pub end_time: String,
    pub staff_survey: bool,
    pub location: Location,
}

impl HashRecord for SurveyRecord {
    fn to_fields(&self) -> Vec<(&'static str, String)> {
        let [a1, a2, a3, a4] = self.location.address.clone();
        vec![
            ("id", self.id.to_string()),
            ("active", encode_bool(self.active).to_string()),
            ("name", self.name.clone()),
            ("start_time", self.start_time.clone()),
            ("end_time", self.end_time.clone()),
            ("staff_survey", encode_bool(self.staff_survey).to_string()),
            ("lat", self.location.coordinates.lat.clone()),
            ("long", self.location.coordinates.lng.clone()),
            ("address1", a1),
            ("address2", a2),
            ("address3", a3),
            ("address4", a4),
        ]
    }

    fn from_fields(fields: &FieldMap) -> Result<Self, CodecError> {
        Ok(SurveyRecord {
            id: SurveyId(decode_int("id", field(fields, "id")?)?),
            active: decode_bool("active", field(fields, "active")?)?,
            name: field(fields, "name")?.to_string(),
            start_time: decode_time_of_day("start_time", field(fields, "start_time")?)?,
            end_time: decode_time_of_day("end_time", field(fields, "end_time")?)?,
            staff_survey: decode_bool("staff_survey", field(fields, "staff_survey")?)?,
            location: Location {
                coordinates: Coordinates {
                    lat: decode_decimal("lat", field(fields, "lat")?)?,
                    lng: decode_decimal("long", field(fields, "long")?)?,
                },
                address: [
                    text(fields, "address1"),
                    text(fields, "address2"),
                    text(fields, "address3"),
                    text(fields, "address4"),
                ],
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapRecord {
    pub id: MapId,
    pub name: String,
    pub image_id: ImageId,
}

impl HashRecord for MapRecord {
    fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("id", self.id.to_string()),
            ("name", self.name.clone()),
            ("image_id", self.image_id.to_string()),
        ]
    }

    fn from_fields(fields: &FieldMap) -> Result<Self, CodecError> {
        Ok(MapRecord {
            id: MapId(decode_int("id", field(fields, "id")?)?),
            name: field(fields, "name")?.to_string(),
            image_id: ImageId(decode_int("image_id", field(fields, "image_id")?)?),
        })
    }
}

/// Where a sensor sits on a map image, in image pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorPosition {
    pub hardware_id: HardwareId,
    pub x_pos: String,
    pub y_pos: String,
}

impl HashRecord for SensorPosition {
    fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("hardware_id", self.hardware_id.to_string()),
            ("x_pos", self.x_pos.clone()),
            ("y_pos", self.y_pos.clone()),
        ]
    }

    fn from_fields(fields: &FieldMap) -> Result<Self, CodecError> {
        Ok(SensorPosition {
            hardware_id: HardwareId(decode_int("hardware_id", field(fields, "hardware_id")?)?),
            x_pos: decode_decimal("x_pos", field(fields, "x_pos")?)?,
            y_pos: decode_decimal("y_pos", field(fields, "y_pos")?)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorRecord {
    pub hardware_id: HardwareId,
    pub survey_id: SurveyId,
    pub survey_device_id: MapId,
    pub host_address: String,
    pub pir_address: String,
    pub device_type: String,
    pub location: String,
    pub description_1: String,
    pub description_2: String,
    pub description_3: String,
    pub room_id: String,
    pub room_name: String,
    pub share_id: String,
    pub floor: String,
    pub room_type: String,
    pub building_name: String,
    pub room_description: String,
}

impl HashRecord for SensorRecord {
    fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("hardware_id", self.hardware_id.to_string()),
            ("survey_id", self.survey_id.to_string()),
            ("survey_device_id", self.survey_device_id.to_string()),
            ("host_address", self.host_address.clone()),
            ("pir_address", self.pir_address.clone()),
            ("device_type", self.device_type.clone()),
            ("location", self.location.clone()),
            ("description_1", self.description_1.clone()),
            ("description_2", self.description_2.clone()),
            ("description_3", self.description_3.clone()),
            ("room_id", self.room_id.clone()),
            ("room_name", self.room_name.clone()),
            ("share_id", self.share_id.clone()),
            ("floor", self.floor.clone()),
            ("room_type", self.room_type.clone()),
            ("building_name", self.building_name.clone()),
            ("room_description", self.room_description.clone()),
        ]
    }

    fn from_fields(fields: &FieldMap) -> Result<Self, CodecError> {
        Ok(SensorRecord {
            hardware_id: HardwareId(decode_int("hardware_id", field(fields, "hardware_id")?)?),
            survey_id: SurveyId(decode_int("survey_id", field(fields, "survey_id")?)?),
            survey_device_id: MapId(decode_int("survey_device_id", field(fields, "survey_device_id")?)?),
            host_address: text(fields, "host_address"),
            pir_address: text(fields, "pir_address"),
            device_type: text(fields, "device_type"),
            location: text(fields, "location"),
            description_1: text(fields, "description_1"),
            description_2: text(fields, "description_2"),
            description_3: text(fields, "description_3"),
            room_id: text(fields, "room_id"),
            room_name: text(fields, "room_name"),
            share_id: text(fields, "share_id"),
            floor: text(fields, "floor"),
            room_type: text(fields, "room_type"),
            building_name: text(fields, "building_name"),
            room_description: text(fields, "room_description"),
        })
    }
}

/// Latest trigger of a sensor. `occupied` is written alongside for consumers that read the
/// hash directly, but is always derived from the trigger type and never read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorStatus {
    pub hardware_id: HardwareId,
    pub last_trigger_type: TriggerType,
    pub last_trigger_timestamp: Option<String>,
}

impl SensorStatus {
    pub fn occupied(&self) -> bool {
        self.last_trigger_type.occupied()
    }
}

impl HashRecord for SensorStatus {
    fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("hardware_id", self.hardware_id.to_string()),
            ("occupied", encode_bool(self.occupied()).to_string()),
            ("last_trigger_type", self.last_trigger_type.as_str().to_string()),
            (
                "last_trigger_timestamp",
                self.last_trigger_timestamp.clone().unwrap_or_default(),
            ),
        ]
    }

    fn from_fields(fields: &FieldMap) -> Result<Self, CodecError> {
        let last_trigger_timestamp = match fields.get("last_trigger_timestamp").map(String::as_str) {
            None | Some("") => None,
            Some(raw) => Some(decode_timestamp("last_trigger_timestamp", raw)?),
        };
        Ok(SensorStatus {
            hardware_id: HardwareId(decode_int("hardware_id", field(fields, "hardware_id")?)?),
            last_trigger_type: TriggerType::from_raw(field(fields, "last_trigger_type")?),
            last_trigger_timestamp,
        })
    }
}

impl HashRecord for OccupancyCounts {
    fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("sensors_absent", self.sensors_absent.to_string()),
            ("sensors_occupied", self.sensors_occupied.to_string()),
            ("sensors_other", self.sensors_other.to_string()),
        ]
    }

    fn from_fields(fields: &FieldMap) -> Result<Self, CodecError> {
        Ok(OccupancyCounts {
            sensors_absent: codec::decode_int("sensors_absent", field(fields, "sensors_absent")?)?,
            sensors_occupied: codec::decode_int("sensors_occupied", field(fields, "sensors_occupied")?)?,
            sensors_other: codec::decode_int("sensors_other", field(fields, "sensors_other")?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_map(fields: Vec<(&'static str, String)>) -> FieldMap {
        fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn survey_fields_use_documented_bool_strings() {
        let survey = SurveyRecord {
            id: SurveyId(9991),
            active: true,
            name: "test survey 1".into(),
            start_time: "10:00".into(),
            end_time: "12:00".into(),
            staff_survey: false,
            location: Location {
                coordinates: Coordinates {
                    lat: "3.14159".into(),
                    lng: "-0.500100".into(),
                },
                address: ["a".into(), "b".into(), "c".into(), "d".into()],
            },
        };
        let fields = to_map(survey.to_fields());
        assert_eq!(fields["active"], "True");
        assert_eq!(fields["staff_survey"], "False");
        assert_eq!(fields["long"], "-0.500100");
        assert_eq!(SurveyRecord::from_fields(&fields), Ok(survey));
    }

    #[test]
    fn malformed_survey_field_is_rejected() {
        let mut fields = to_map(vec![
            ("id", "9991".into()),
            ("active", "True".into()),
            ("name", "x".into()),
            ("start_time", "10:00".into()),
            ("end_time", "12:00".into()),
            ("staff_survey", "maybe".into()),
            ("lat", "1".into()),
            ("long", "2".into()),
        ]);
        assert!(matches!(
            SurveyRecord::from_fields(&fields),
            Err(CodecError::Invalid { field: "staff_survey", .. })
        ));
        fields.remove("staff_survey");
        assert_eq!(
            SurveyRecord::from_fields(&fields),
            Err(CodecError::MissingField("staff_survey"))
        );
    }

    #[test]
    fn status_occupied_follows_trigger_not_stored_flag() {
        let fields = to_map(vec![
            ("hardware_id", "6666661".into()),
            ("occupied", "True".into()),
            ("last_trigger_type", "Absent".into()),
            ("last_trigger_timestamp", "2020-10-16T09:38:22+01:00".into()),
        ]);
        let status = SensorStatus::from_fields(&fields).expect("decode");
        assert!(!status.occupied());
        assert_eq!(to_map(status.to_fields())["occupied"], "False");
    }

    #[test]
    fn empty_trigger_timestamp_reads_as_none() {
        let fields = to_map(vec![
            ("hardware_id", "1".into()),
            ("last_trigger_type", "Occupied".into()),
            ("last_trigger_timestamp", "".into()),
        ]);
        let status = SensorStatus::from_fields(&fields).expect("decode");
        assert_eq!(status.last_trigger_timestamp, None);
        assert!(status.occupied());
    }
}
