// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Built-in catalog of known vehicle signal paths.
//!
//! The catalog is the validation authority: unknown paths are invalid,
//! known paths with questionable declarations (over-rate subscriptions,
//! write access to read-only paths) are valid with warnings.

use vea_core::{SignalAccess, SignalSpec, ValidationReport};

/// One known signal path.
#[derive(Debug, Clone, Copy)]
pub struct CatalogEntry {
    pub path: &'static str,
    pub type_name: &'static str,
    pub writable: bool,
    pub max_rate_hz: f64,
}

/// Signals this deployment knows about.
const BUILTIN: &[CatalogEntry] = &[
    CatalogEntry { path: "Vehicle.Speed", type_name: "float", writable: false, max_rate_hz: 100.0 },
    CatalogEntry {
        path: "Vehicle.TraveledDistance",
        type_name: "float",
        writable: false,
        max_rate_hz: 10.0,
    },
    CatalogEntry {
        path: "Vehicle.CurrentLocation.Latitude",
        type_name: "float",
        writable: false,
        max_rate_hz: 10.0,
    },
    CatalogEntry {
        path: "Vehicle.CurrentLocation.Longitude",
        type_name: "float",
        writable: false,
        max_rate_hz: 10.0,
    },
    CatalogEntry {
        path: "Vehicle.Powertrain.TractionBattery.StateOfCharge.Current",
        type_name: "float",
        writable: false,
        max_rate_hz: 1.0,
    },
    CatalogEntry {
        path: "Vehicle.Powertrain.Transmission.CurrentGear",
        type_name: "int",
        writable: false,
        max_rate_hz: 10.0,
    },
    CatalogEntry {
        path: "Vehicle.Cabin.HVAC.AmbientAirTemperature",
        type_name: "float",
        writable: false,
        max_rate_hz: 1.0,
    },
    CatalogEntry {
        path: "Vehicle.Cabin.HVAC.Station.Row1.Left.Temperature",
        type_name: "int",
        writable: true,
        max_rate_hz: 1.0,
    },
    CatalogEntry {
        path: "Vehicle.Cabin.Infotainment.HMI.DisplayBrightness",
        type_name: "int",
        writable: true,
        max_rate_hz: 5.0,
    },
    CatalogEntry {
        path: "Vehicle.Body.Lights.Beam.Low.IsOn",
        type_name: "boolean",
        writable: true,
        max_rate_hz: 5.0,
    },
    CatalogEntry {
        path: "Vehicle.Body.Lights.Hazard.IsSignaling",
        type_name: "boolean",
        writable: true,
        max_rate_hz: 5.0,
    },
    CatalogEntry {
        path: "Vehicle.Chassis.Axle.Row1.Wheel.Left.Tire.Pressure",
        type_name: "float",
        writable: false,
        max_rate_hz: 1.0,
    },
];

/// Lookup + validation over the known signal set.
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: &'static [CatalogEntry],
}

impl Catalog {
    pub fn builtin() -> Self {
        Self { entries: BUILTIN }
    }

    pub fn lookup(&self, path: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Partition declarations into `{valid, invalid, warnings}`.
    pub fn validate(&self, specs: &[SignalSpec]) -> ValidationReport {
        let mut report = ValidationReport { total: specs.len(), ..Default::default() };

        for spec in specs {
            let Some(entry) = self.lookup(&spec.path) else {
                report.invalid.push(spec.path.clone());
                continue;
            };
            report.valid.push(spec.path.clone());

            if spec.access == SignalAccess::Write && !entry.writable {
                report.warnings.push(format!(
                    "{} is read-only; writes will be denied",
                    spec.path
                ));
            }
            if let Some(rate) = spec.rate_hz {
                if rate > entry.max_rate_hz {
                    report.warnings.push(format!(
                        "{}: requested {rate} Hz exceeds catalog max {} Hz",
                        spec.path, entry.max_rate_hz
                    ));
                }
            }
        }

        report
    }
}

#[cfg(test)]
#[path = "catalog_tests.rs"]
mod tests;
