//! Shared fixtures: three surveys, one map with one sensor, written the way an older writer
//! left them (lists built with LPUSH, coordinates as text).

use crate::codec;
use crate::keys::KeySchema;
use crate::models::occupancy::{HardwareId, ImageId, MapId, SurveyId, UsageBuckets, UsageCounts};
use crate::store::memory::MemoryStore;
use crate::store::{Batch, Store};

pub const PIXEL_PNG: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";

#[allow(clippy::too_many_arguments)]
fn survey_fields(
    id: &str,
    active: &str,
    start: &str,
    end: &str,
    staff: &str,
    lat: &str,
    lng: &str,
    suffix: &str,
) -> Vec<(&'static str, String)> {
    let name = match id {
        "9991" => "test survey 1",
        "9992" => "test survey 2",
        _ => "test survey 3",
    };
    vec![
        ("id", id.to_string()),
        ("active", active.to_string()),
        ("name", name.to_string()),
        ("start_time", start.to_string()),
        ("end_time", end.to_string()),
        ("staff_survey", staff.to_string()),
        ("lat", lat.to_string()),
        ("long", lng.to_string()),
        ("address1", format!("some building{suffix}")),
        ("address2", format!("some street{suffix}")),
        ("address3", format!("some city{suffix}")),
        ("address4", format!("postcode please{suffix}")),
    ]
}

/// 24 × 6 ten-minute slots with distinct counts per slot.
pub fn fixture_buckets() -> UsageBuckets {
    let mut buckets = UsageBuckets::new();
    for h in 0..24u64 {
        for m in (0..60u64).step_by(10) {
            buckets.insert(
                format!("{h:02}:{m:02}:00"),
                UsageCounts {
                    sensors_absent: m + (24 - h),
                    sensors_occupied: h + (60 - m),
                    sensors_total: 74,
                },
            );
        }
    }
    buckets
}

pub fn fixture_batch(keys: &KeySchema) -> Batch {
    let s1 = SurveyId(9991);
    let map = MapId(3331);
    let hw = HardwareId(6666661);

    let mut batch = Batch::new();
    batch.lpush(keys.surveys_list(), vec!["9991".into(), "9992".into(), "9993".into()]);
    batch.lpush(keys.survey_sensors_list(s1), vec!["6666661".into()]);
    batch.lpush(keys.survey_maps_list(s1), vec!["3331".into()]);
    batch.lpush(keys.survey_map_sensors_list(s1, map), vec!["6666661".into()]);

    batch.replace_hash(
        keys.survey_data(s1),
        survey_fields("9991", "True", "10:00", "12:00", "False", "3.14159", "-0.500100", ""),
    );
    batch.replace_hash(
        keys.survey_data(SurveyId(9992)),
        survey_fields("9992", "False", "09:00", "17:00", "True", "2.14159", "-1.500100", "2"),
    );
    batch.replace_hash(
        keys.survey_data(SurveyId(9993)),
        survey_fields("9993", "True", "12:00", "14:00", "False", "1.14159", "-2.500100", "3"),
    );

    batch.set(keys.image_base64(ImageId(9991)), PIXEL_PNG.to_string());
    batch.set(keys.image_content_type(ImageId(9991)), "image/png".to_string());

    batch.replace_hash(
        keys.survey_map_data(s1, map),
        vec![
            ("id", "3331".to_string()),
            ("name", "E&ET".to_string()),
            ("image_id", "1115".to_string()),
        ],
    );
    batch.replace_hash(
        keys.survey_map_sensor_properties(s1, map, hw),
        vec![
            ("hardware_id", "6666661".to_string()),
            ("x_pos", "123.0".to_string()),
            ("y_pos", "321.0".to_string()),
        ],
    );
    batch.replace_hash(
        keys.survey_sensor_data(s1, hw),
        vec![
            ("survey_id", "9991".to_string()),
            ("hardware_id", "6666661".to_string()),
            ("survey_device_id", "3331".to_string()),
            ("host_address", "123".to_string()),
            ("pir_address", "8".to_string()),
            ("device_type", "Desk".to_string()),
            ("location", String::new()),
            ("description_1", "Teaching".to_string()),
            ("description_2", String::new()),
            ("description_3", "TT".to_string()),
            ("room_id", "275".to_string()),
            ("room_name", "B1.07".to_string()),
            ("share_id", "None".to_string()),
            ("floor", "-1".to_string()),
            ("room_type", "Room".to_string()),
            ("building_name", "The Testing".to_string()),
            ("room_description", String::new()),
        ],
    );
    batch.replace_hash(
        keys.survey_sensor_status(s1, hw),
        vec![
            ("occupied", "False".to_string()),
            ("hardware_id", "6666661".to_string()),
            ("last_trigger_type", "Absent".to_string()),
            ("last_trigger_timestamp", "2020-10-16T09:38:22+01:00".to_string()),
        ],
    );
    batch.set(keys.survey_max_timestamp(s1), "2020-11-12T00:55:16".to_string());
    if let Ok(json) = codec::encode_json(&fixture_buckets()) {
        batch.set(keys.time_averages(s1, 1), json);
    }
    batch.set(keys.survey_map_vmax_x(s1, map), "123".to_string());
    batch.set(keys.survey_map_vmax_y(s1, map), "321".to_string());
    batch.set(keys.survey_map_viewbox(s1, map), "0 0 1234 4321".to_string());
    batch
}

/// A memory store holding the fixture under the default prefix.
pub fn seeded_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    store
        .apply(&fixture_batch(&KeySchema::default()))
        .expect("seeding an available memory store");
    store
}
