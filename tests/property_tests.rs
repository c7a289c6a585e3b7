//! Property-based tests for the layout model and sanitize decoding.

use proptest::prelude::*;

use repairctl::layout::{DeviceNaming, LayoutSpec, PartitionRole, PartitionSeparator};
use repairctl::sanitize::{decode, SanitizeState};
use repairctl::system::SanitizeStatus;

/// Strategy for plausible block device basenames.
fn device_name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "(sd[a-z])".prop_map(|n| format!("/dev/{n}")),
        "(nvme[0-9]n[0-9])".prop_map(|n| format!("/dev/{n}")),
        "(mmcblk[0-9])".prop_map(|n| format!("/dev/{n}")),
        "(vd[a-z])".prop_map(|n| format!("/dev/{n}")),
    ]
}

fn separator_strategy() -> impl Strategy<Value = PartitionSeparator> {
    prop_oneof![
        Just(PartitionSeparator::None),
        Just(PartitionSeparator::Letter),
    ]
}

proptest! {
    /// Rendering is total: one header plus one line per slot, each line
    /// addressing the partition path derived from the naming convention.
    #[test]
    fn render_is_one_line_per_slot(
        device in device_name_strategy(),
        separator in separator_strategy(),
    ) {
        let layout = LayoutSpec::standard();
        let naming = DeviceNaming::new(device.clone(), separator);
        let script = layout.render(&naming);
        let lines: Vec<&str> = script.lines().collect();

        prop_assert_eq!(lines[0], "label: gpt");
        prop_assert_eq!(lines.len(), layout.slots().len() + 1);
        for (i, line) in lines[1..].iter().enumerate() {
            let expected = format!("{}{}{} : ", device, separator.as_str(), i + 1);
            prop_assert!(line.starts_with(&expected), "line {i}: {line}");
        }
    }

    /// Every slot except the final one carries an explicit size clause.
    #[test]
    fn render_sizes_all_but_the_remainder_slot(
        device in device_name_strategy(),
        separator in separator_strategy(),
    ) {
        let layout = LayoutSpec::standard();
        let naming = DeviceNaming::new(device, separator);
        let script = layout.render(&naming);
        let lines: Vec<&str> = script.lines().skip(1).collect();
        let (last, rest) = lines.split_last().unwrap();
        for line in rest {
            prop_assert!(line.contains("size="));
        }
        prop_assert!(!last.contains("size="));
    }

    /// Partition paths are injective over roles for a fixed device.
    #[test]
    fn partition_paths_are_distinct(
        device in device_name_strategy(),
        separator in separator_strategy(),
    ) {
        let naming = DeviceNaming::new(device, separator);
        let mut paths: Vec<_> = PartitionRole::all()
            .into_iter()
            .map(|role| naming.partition(role))
            .collect();
        paths.sort();
        paths.dedup();
        prop_assert_eq!(paths.len(), PartitionRole::all().len());
    }

    /// The detected convention always produces a path that extends the
    /// device path.
    #[test]
    fn detected_paths_extend_the_device(device in device_name_strategy()) {
        let naming = DeviceNaming::detect(device.clone());
        for role in PartitionRole::all() {
            let path = naming.partition(role).display().to_string();
            prop_assert!(path.starts_with(&device));
            prop_assert!(path.ends_with(&role.index().to_string()));
        }
    }

    /// An active sanitize status always decodes to a bounded percentage.
    #[test]
    fn active_sanitize_progress_is_bounded(sprog in 0u32..=0xFFFF) {
        let state = decode(Some(SanitizeStatus { sstat: 2, sprog })).unwrap();
        match state {
            SanitizeState::InProgress(pct) => prop_assert!(pct <= 100),
            other => prop_assert!(false, "expected in-progress, got {other:?}"),
        }
    }

    /// Decoding only ever depends on the low three status bits.
    #[test]
    fn sanitize_decode_ignores_high_status_bits(high in 0u32..=0x1FFF) {
        let base = decode(Some(SanitizeStatus { sstat: 1, sprog: 0 }));
        let shifted = decode(Some(SanitizeStatus { sstat: 1 + high * 8, sprog: 0 }));
        prop_assert_eq!(base.unwrap(), shifted.unwrap());
    }
}
