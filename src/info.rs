//! Telemetry snapshots.
//!
//! Every field is read with its own bus transfer, so a snapshot is not atomic:
//! readings may be taken a few transfers apart. A field that failed to read is
//! `None` and does not invalidate the rest of the snapshot.

use heapless::LinearMap;

macro_rules! snapshot {
    (
        $(#[$meta:meta])*
        $name:ident[$count:literal] {
            $( $(#[$field_meta:meta])* $field:ident: $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        pub struct $name {
            $( $(#[$field_meta])* pub $field: Option<$ty>, )*
        }

        impl $name {
            pub const FIELDS: [&'static str; $count] = [$(stringify!($field)),*];

            /// Returns the successfully read fields, keyed by field name.
            pub fn to_map(&self) -> LinearMap<&'static str, i32, $count> {
                let mut map = LinearMap::new();
                $(
                    if let Some(value) = self.$field {
                        // Capacity equals the field count, insertion can't fail.
                        let _ = map.insert(stringify!($field), i32::from(value));
                    }
                )*
                map
            }

            /// Whether every field was read successfully.
            pub fn is_complete(&self) -> bool {
                true $( && self.$field.is_some() )*
            }
        }
    };
}

snapshot! {
    /// The handful of readings most applications display.
    BasicInfo[4] {
        /// mV
        voltage: u16,
        /// Average current in mA, negative while discharging
        current: i16,
        /// %
        soc: u16,
        /// %
        soh: u8,
    }
}

snapshot! {
    /// Every standard command the gauge implements.
    AllInfo[21] {
        /// Last `Control()` response word
        control: u16,
        /// 0.1 K
        temperature: u16,
        /// mV
        voltage: u16,
        /// Raw `Flags()` bits
        flags: u16,
        /// mAh
        nominal_capacity: u16,
        /// mAh
        available_capacity: u16,
        /// mAh
        remaining_capacity: u16,
        /// mAh
        full_capacity: u16,
        /// mA
        average_current: i16,
        /// mA
        standby_current: i16,
        /// mA
        max_current: i16,
        /// mW
        average_power: i16,
        /// %
        soc: u16,
        /// 0.1 K
        internal_temperature: u16,
        /// %
        soh: u8,
        remaining_capacity_unfiltered: u16,
        remaining_capacity_filtered: u16,
        full_capacity_unfiltered: u16,
        full_capacity_filtered: u16,
        soc_unfiltered: u16,
        true_remaining_capacity: u16,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn map_skips_missing_fields() {
        let info = BasicInfo {
            voltage: Some(3700),
            current: None,
            soc: Some(78),
            soh: Some(95),
        };

        let map = info.to_map();

        assert!(!info.is_complete());
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(&"voltage"), Some(&3700));
        assert_eq!(map.get(&"current"), None);
    }

    #[test]
    fn field_names_follow_declaration_order() {
        assert_eq!(BasicInfo::FIELDS, ["voltage", "current", "soc", "soh"]);
        assert_eq!(AllInfo::FIELDS[0], "control");
        assert_eq!(AllInfo::FIELDS[20], "true_remaining_capacity");
    }

    #[test]
    fn empty_snapshot_maps_to_nothing() {
        assert!(AllInfo::default().to_map().is_empty());
    }
}
