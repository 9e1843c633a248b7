use crate::telemetry::Telemetry;
use chrono::Utc;
use rand::Rng;

/// Fixed bounding box the walker is clamped into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geofence {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl Geofence {
    /// Hard clamp, not a reflection: a walker pushed past an edge stays on it.
    pub fn clamp(&self, lat: f64, lon: f64) -> (f64, f64) {
        (
            lat.clamp(self.lat_min, self.lat_max),
            lon.clamp(self.lon_min, self.lon_max),
        )
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.lat_min..=self.lat_max).contains(&lat) && (self.lon_min..=self.lon_max).contains(&lon)
    }
}

impl Default for Geofence {
    fn default() -> Self {
        Self {
            lat_min: 12.96,
            lat_max: 12.98,
            lon_min: 79.15,
            lon_max: 79.17,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WalkParams {
    pub geofence: Geofence,
    /// Walk origin; the first position is jittered around it.
    pub origin: (f64, f64),
    pub origin_jitter: f64,
    /// Step length in degrees per tick.
    pub step: f64,
    /// Maximum heading change per tick, in degrees.
    pub max_turn: f64,
    pub battery_start: f64,
    pub battery_floor: f64,
    pub battery_drain: (f64, f64),
}

impl Default for WalkParams {
    fn default() -> Self {
        Self {
            geofence: Geofence::default(),
            origin: (12.9692, 79.1559),
            origin_jitter: 0.002,
            step: 0.00001,
            max_turn: 30.0,
            battery_start: 3.9,
            battery_floor: 3.2,
            battery_drain: (0.0001, 0.0003),
        }
    }
}

const DATA_RATE_WINDOW: u32 = 30;

/// Walker state carried between ticks.
#[derive(Debug, Clone)]
pub struct RandomWalker {
    params: WalkParams,
    lat: f64,
    lon: f64,
    heading: f64,
    battery: f64,
    packet_count: u32,
}

impl RandomWalker {
    pub fn new(params: WalkParams, rng: &mut impl Rng) -> Self {
        let jitter = params.origin_jitter;
        let lat = params.origin.0 + jitter_offset(rng, jitter);
        let lon = params.origin.1 + jitter_offset(rng, jitter);
        let (lat, lon) = params.geofence.clamp(lat, lon);
        let heading = rng.gen_range(0.0..360.0);
        let battery = params.battery_start;

        Self {
            params,
            lat,
            lon,
            heading,
            battery,
            packet_count: 0,
        }
    }

    pub fn position(&self) -> (f64, f64) {
        (self.lat, self.lon)
    }

    pub fn heading(&self) -> f64 {
        self.heading
    }

    pub fn battery(&self) -> f64 {
        self.battery
    }

    /// Advances the walk by one tick and returns the resulting reading.
    pub fn step(&mut self, rng: &mut impl Rng) -> Telemetry {
        let turn = self.params.max_turn;
        if turn > 0.0 {
            self.heading += rng.gen_range(-turn..=turn);
        }

        let radians = self.heading.to_radians();
        let lat = self.lat + self.params.step * radians.cos();
        let lon = self.lon + self.params.step * radians.sin();
        (self.lat, self.lon) = self.params.geofence.clamp(lat, lon);

        let (drain_min, drain_max) = self.params.battery_drain;
        let drain = if drain_max > drain_min {
            rng.gen_range(drain_min..drain_max)
        } else {
            drain_min
        };
        self.battery = (self.battery - drain).max(self.params.battery_floor);

        self.packet_count = self.packet_count.wrapping_add(1);

        Telemetry {
            timestamp: Utc::now(),
            latitude: round_to(self.lat, 6),
            longitude: round_to(self.lon, 6),
            altitude: round_to(310.0 + rng.gen_range(-5.0..=5.0), 1),
            speed: round_to(rng.gen_range(0.5..=2.5), 2),
            satellites: rng.gen_range(5..=9),
            battery: round_to(self.battery, 3),
            rssi: rng.gen_range(-75..=-45),
            temperature: round_to(rng.gen_range(25.0..=35.0), 1),
            humidity: round_to(rng.gen_range(40.0..=75.0), 1),
            data_rate: self.packet_count % DATA_RATE_WINDOW,
            packet_loss: rng.gen_range(0..=3),
            latency: rng.gen_range(15..=60),
        }
    }
}

fn jitter_offset(rng: &mut impl Rng, jitter: f64) -> f64 {
    if jitter > 0.0 {
        rng.gen_range(-jitter..=jitter)
    } else {
        0.0
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn walker(seed: u64) -> (RandomWalker, StdRng) {
        let mut rng = StdRng::seed_from_u64(seed);
        let walker = RandomWalker::new(WalkParams::default(), &mut rng);
        (walker, rng)
    }

    #[test]
    fn test_starts_near_origin() {
        let (walker, _) = walker(1);
        let (lat, lon) = walker.position();
        assert!((lat - 12.9692).abs() <= 0.002 + 1e-12);
        assert!((lon - 79.1559).abs() <= 0.002 + 1e-12);
        assert_eq!(walker.battery(), 3.9);
    }

    #[test]
    fn test_heading_changes_at_most_max_turn() {
        let (mut walker, mut rng) = walker(2);
        for _ in 0..200 {
            let before = walker.heading();
            walker.step(&mut rng);
            assert!((walker.heading() - before).abs() <= 30.0 + 1e-9);
        }
    }

    #[test]
    fn test_stays_inside_geofence() {
        let (mut walker, mut rng) = walker(3);
        let fence = Geofence::default();
        for _ in 0..1000 {
            let t = walker.step(&mut rng);
            assert!(fence.contains(t.latitude, t.longitude));
        }
    }

    #[test]
    fn test_clamp_sticks_to_edge() {
        let params = WalkParams {
            origin: (12.98, 79.16),
            origin_jitter: 0.0,
            step: 0.01,
            max_turn: 0.0,
            ..WalkParams::default()
        };
        let mut rng = StdRng::seed_from_u64(4);
        let mut walker = RandomWalker::new(params, &mut rng);
        // Force a due-north heading so every step pushes past lat_max.
        walker.heading = 0.0;
        for _ in 0..5 {
            let t = walker.step(&mut rng);
            assert_eq!(t.latitude, 12.98);
        }
    }

    #[test]
    fn test_battery_drains_to_floor() {
        let params = WalkParams {
            battery_start: 3.21,
            battery_drain: (0.004, 0.005),
            ..WalkParams::default()
        };
        let mut rng = StdRng::seed_from_u64(5);
        let mut walker = RandomWalker::new(params, &mut rng);

        let mut last = walker.battery();
        for _ in 0..10 {
            let t = walker.step(&mut rng);
            assert!(t.battery <= last);
            assert!(t.battery >= 3.2);
            last = walker.battery();
        }
        assert_eq!(walker.battery(), 3.2);
    }

    #[test]
    fn test_data_rate_rolls_over() {
        let (mut walker, mut rng) = walker(6);
        let rates: Vec<u32> = (0..31).map(|_| walker.step(&mut rng).data_rate).collect();
        assert_eq!(rates[0], 1);
        assert_eq!(rates[28], 29);
        assert_eq!(rates[29], 0);
        assert_eq!(rates[30], 1);
    }

    #[test]
    fn test_sensor_ranges() {
        let (mut walker, mut rng) = walker(7);
        for _ in 0..500 {
            let t = walker.step(&mut rng);
            assert!((305.0..=315.0).contains(&t.altitude));
            assert!((0.5..=2.5).contains(&t.speed));
            assert!((5..=9).contains(&t.satellites));
            assert!((-75..=-45).contains(&t.rssi));
            assert!(t.packet_loss <= 3);
            assert!((15..=60).contains(&t.latency));
            assert!((25.0..=35.0).contains(&t.temperature));
            assert!((40.0..=75.0).contains(&t.humidity));
        }
    }
}
