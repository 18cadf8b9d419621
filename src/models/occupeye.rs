//! Response bodies of the OccupEye cloud API, as far as the cache consumes them.
//!
//! Notes
//! - Field names follow the API's PascalCase; ids are unsigned integers.
//! - Free-text sensor attributes arrive as strings, numbers or `null` depending on how the
//!   deployment was configured. They are normalised to `String` on the way in.
//! - Coordinates keep their JSON number text (`123.0` stays `"123.0"`).

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Number;

/// Accept a string, number, bool or null and return its text (`null` → empty string).
fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct V;
    impl<'de> serde::de::Visitor<'de> for V {
        type Value = String;

        fn expecting(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
            write!(f, "a string, number, boolean or null")
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_string<E: serde::de::Error>(self, v: String) -> Result<String, E> {
            Ok(v)
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_bool<E: serde::de::Error>(self, v: bool) -> Result<String, E> {
            Ok(if v { "True" } else { "False" }.to_string())
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<String, E> {
            Ok(String::new())
        }

        fn visit_none<E: serde::de::Error>(self) -> Result<String, E> {
            Ok(String::new())
        }

        fn visit_some<D2: Deserializer<'de>>(self, d: D2) -> Result<String, D2::Error> {
            d.deserialize_any(V)
        }
    }

    deserializer.deserialize_any(V)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Survey {
    #[serde(rename = "SurveyID")]
    pub survey_id: u64,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

/// Entry of the per-survey map listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapListing {
    #[serde(rename = "MapID")]
    pub map_id: u64,
    #[serde(rename = "MapName")]
    pub map_name: String,
    #[serde(rename = "ImageID")]
    pub image_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapItem {
    #[serde(rename = "HardwareID")]
    pub hardware_id: u64,
    #[serde(rename = "X")]
    pub x: Number,
    #[serde(rename = "Y")]
    pub y: Number,
}

/// Map detail fetched with `origin=tl`, so item coordinates are measured from the top left of
/// the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapDetail {
    #[serde(rename = "MapID")]
    pub map_id: u64,
    #[serde(rename = "VMaxX")]
    pub vmax_x: Number,
    #[serde(rename = "VMaxY")]
    pub vmax_y: Number,
    #[serde(rename = "ViewBox")]
    pub view_box: String,
    #[serde(rename = "MapItemViewModels", default)]
    pub items: Vec<MapItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SurveySensor {
    #[serde(rename = "HardwareID")]
    pub hardware_id: u64,
    #[serde(rename = "SurveyID")]
    pub survey_id: u64,
    #[serde(rename = "SurveyDeviceID")]
    pub survey_device_id: u64,
    #[serde(deserialize_with = "lenient_text", default)]
    pub host_address: String,
    #[serde(rename = "PIRAddress", deserialize_with = "lenient_text", default)]
    pub pir_address: String,
    #[serde(deserialize_with = "lenient_text", default)]
    pub device_type: String,
    #[serde(deserialize_with = "lenient_text", default)]
    pub location: String,
    #[serde(rename = "Description1", deserialize_with = "lenient_text", default)]
    pub description_1: String,
    #[serde(rename = "Description2", deserialize_with = "lenient_text", default)]
    pub description_2: String,
    #[serde(rename = "Description3", deserialize_with = "lenient_text", default)]
    pub description_3: String,
    #[serde(rename = "RoomID", deserialize_with = "lenient_text", default)]
    pub room_id: String,
    #[serde(deserialize_with = "lenient_text", default)]
    pub room_name: String,
    #[serde(rename = "ShareID", deserialize_with = "lenient_text", default)]
    pub share_id: String,
    #[serde(deserialize_with = "lenient_text", default)]
    pub floor: String,
    #[serde(deserialize_with = "lenient_text", default)]
    pub room_type: String,
    #[serde(deserialize_with = "lenient_text", default)]
    pub building_name: String,
    #[serde(deserialize_with = "lenient_text", default)]
    pub room_description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorStatus {
    #[serde(rename = "HardwareID")]
    pub hardware_id: u64,
    #[serde(rename = "LastTriggerType", default)]
    pub last_trigger_type: Option<String>,
    #[serde(rename = "LastTriggerTime", default)]
    pub last_trigger_time: Option<String>,
}

/// One time slot of one day in a historical occupancy query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UsageRow {
    pub trigger_date: NaiveDate,
    /// "HH:MM:SS", start of the slot.
    pub time_slot: String,
    pub sensors_absent: u64,
    pub sensors_occupied: u64,
    pub sensors_total: u64,
}

/// Raw floor-plan image as served by the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub content_type: String,
    pub bytes: Vec<u8>,
}
