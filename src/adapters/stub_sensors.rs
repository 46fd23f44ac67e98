//! Random-value telemetry source.
//!
//! Stands in for the BMS and GPS boards until the sensor interface exists.
//! Values are uniformly distributed over physically plausible ranges;
//! timestamps come from the wall clock.

use rand_core::RngCore;

use crate::app::ports::{Clock, TelemetrySource};
use crate::telemetry::{BatteryStatus, Location, MAX_CELLS, MAX_THERMISTORS};

const CELL_VOLTAGE_MAX: f32 = 4.2;
const PACK_VOLTAGE_MAX: f32 = 50.0;
const CURRENT_MAX: f32 = 10.0;
const TEMP_MAX: f32 = 100.0;
const BMS_STATES: u32 = 100;

pub struct RandomTelemetrySource<R, C> {
    rng: R,
    clock: C,
}

impl<R: RngCore, C: Clock> RandomTelemetrySource<R, C> {
    pub fn new(rng: R, clock: C) -> Self {
        Self { rng, clock }
    }

    /// Uniform in `[0, 1)`.
    fn unit(&mut self) -> f32 {
        (self.rng.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }

    fn range(&mut self, lo: f32, hi: f32) -> f32 {
        lo + self.unit() * (hi - lo)
    }

    fn flag(&mut self) -> bool {
        self.rng.next_u32() & 1 == 1
    }
}

impl<C: Clock> RandomTelemetrySource<rand_core::UnwrapErr<rand_core::OsRng>, C> {
    /// Seeded from the OS entropy source (the ESP32 hardware RNG on device).
    pub fn with_os_rng(clock: C) -> Self {
        Self::new(rand_core::UnwrapErr(rand_core::OsRng), clock)
    }
}

impl<R: RngCore, C: Clock> TelemetrySource for RandomTelemetrySource<R, C> {
    fn battery_status(&mut self) -> BatteryStatus {
        let mut cell_voltages = [0.0; MAX_CELLS];
        for v in &mut cell_voltages {
            *v = self.range(0.0, CELL_VOLTAGE_MAX);
        }
        let mut bat_temps = [0.0; MAX_THERMISTORS];
        for t in &mut bat_temps {
            *t = self.range(0.0, TEMP_MAX);
        }
        let now = self.clock.unix_time();

        BatteryStatus {
            state: (self.rng.next_u32() % BMS_STATES) as u16,
            chg_enable: self.flag(),
            dis_enable: self.flag(),
            connected_cells: (self.rng.next_u32() % (MAX_CELLS as u32 + 1)) as u16,
            cell_voltages,
            cell_voltage_max: self.range(0.0, CELL_VOLTAGE_MAX),
            cell_voltage_min: self.range(0.0, CELL_VOLTAGE_MAX),
            cell_voltage_avg: self.range(0.0, CELL_VOLTAGE_MAX),
            pack_voltage: self.range(0.0, PACK_VOLTAGE_MAX),
            stack_voltage: self.range(0.0, PACK_VOLTAGE_MAX),
            pack_current: self.range(0.0, CURRENT_MAX),
            bat_temps,
            bat_temp_max: self.range(0.0, TEMP_MAX),
            bat_temp_min: self.range(0.0, TEMP_MAX),
            bat_temp_avg: self.range(0.0, TEMP_MAX),
            mosfet_temp: self.range(0.0, TEMP_MAX),
            ic_temp: self.range(0.0, TEMP_MAX),
            mcu_temp: self.range(0.0, TEMP_MAX),
            full: self.flag(),
            empty: self.flag(),
            soc: self.range(0.0, 100.0),
            balancing_status: self.rng.next_u32(),
            no_idle_timestamp: now,
            error_flags: self.rng.next_u32(),
            timestamp: now,
        }
    }

    fn location(&mut self) -> Location {
        Location {
            latitude: self.range(-90.0, 90.0),
            longitude: self.range(-180.0, 180.0),
            timestamp: self.clock.unix_time(),
        }
    }
}
