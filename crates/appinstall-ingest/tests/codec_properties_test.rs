//! Property tests for the install log codec

use appinstall_ingest::codec::{self, CodecError};
use proptest::prelude::*;

fn device_type() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("idfa".to_string()),
        Just("gaid".to_string()),
        Just("adid".to_string()),
        Just("dvid".to_string()),
        "[a-z]{1,8}",
    ]
}

proptest! {
    #[test]
    fn well_formed_lines_round_trip(
        device_type in device_type(),
        device_id in "[A-Za-z0-9-]{1,36}",
        lat in -90.0f64..90.0,
        lon in -180.0f64..180.0,
        apps in prop::collection::vec(any::<u32>(), 1..32),
    ) {
        let raw_apps: Vec<String> = apps.iter().map(u32::to_string).collect();
        let line = format!("{}\t{}\t{}\t{}\t{}", device_type, device_id, lat, lon, raw_apps.join(","));

        let item = codec::encode(&line).unwrap();
        prop_assert_eq!(item.key, format!("{}:{}", device_type, device_id));

        let payload = codec::decode(&item.value).unwrap();
        prop_assert_eq!(payload.lat, lat);
        prop_assert_eq!(payload.lon, lon);
        prop_assert_eq!(payload.apps, apps);
    }

    #[test]
    fn wrong_field_count_is_malformed(fields in prop::collection::vec("[a-z0-9]{1,6}", 0..12)) {
        prop_assume!(fields.len() != codec::FIELD_COUNT);
        let line = fields.join("\t");

        prop_assert_eq!(
            codec::encode(&line).unwrap_err(),
            CodecError::MalformedLine { found: fields.len().max(1) }
        );
    }

    #[test]
    fn non_numeric_app_id_is_rejected(bad in "[a-z]{1,5}") {
        let line = format!("gaid\tid\t1.0\t2.0\t1,{},3", bad);
        prop_assert_eq!(
            codec::encode(&line).unwrap_err(),
            CodecError::InvalidAppId { value: bad }
        );
    }
}

#[test]
fn test_reference_examples() {
    let item = codec::encode("idfa\tabc123\t55.55\t37.37\t42,43,44").unwrap();
    assert_eq!(item.key, "idfa:abc123");
    let payload = codec::decode(&item.value).unwrap();
    assert_eq!((payload.lat, payload.lon), (55.55, 37.37));
    assert_eq!(payload.apps, vec![42, 43, 44]);

    assert_eq!(
        codec::encode("gaid\t\t55.55\t37.37\t1").unwrap_err(),
        CodecError::MissingIdentity
    );
    assert_eq!(
        codec::encode("gaid\tx\t55.55\t37.37").unwrap_err(),
        CodecError::MalformedLine { found: 4 }
    );
}

#[test]
fn test_concurrent_encoding_matches_serial() {
    let lines: Vec<String> = (0..2_000)
        .map(|i| match i % 5 {
            0 => format!("idfa\tid{}\t{}.5\t-{}.25\t{},{}", i, i % 90, i % 180, i, i * 7),
            1 => format!("gaid\tid{}\t1\t2", i),
            2 => format!("adid\t\t1\t2\t{}", i),
            3 => format!("dvid\tid{}\tnan-ish\t2\t{}", i, i),
            _ => format!("xyz\tid{}\t0\t0\t{}", i, i),
        })
        .collect();

    let serial: Vec<_> = lines.iter().map(|l| codec::encode(l)).collect();

    let concurrent: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = lines
            .chunks(250)
            .map(|chunk| scope.spawn(move || chunk.iter().map(|l| codec::encode(l)).collect::<Vec<_>>()))
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    assert_eq!(serial, concurrent);
}
