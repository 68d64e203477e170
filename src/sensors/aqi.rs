//! US EPA air quality index from particulate concentrations.
//!
//! Piecewise-linear interpolation over the EPA breakpoint tables. Values
//! beyond the last breakpoint report the top of the scale.

const AQI_MAX: u16 = 500;

/// (concentration low, concentration high, index low, index high)
type Breakpoint = (f32, f32, u16, u16);

const PM25_BREAKPOINTS: [Breakpoint; 7] = [
    (0.0, 12.0, 0, 50),
    (12.1, 35.4, 51, 100),
    (35.5, 55.4, 101, 150),
    (55.5, 150.4, 151, 200),
    (150.5, 250.4, 201, 300),
    (250.5, 350.4, 301, 400),
    (350.5, 500.4, 401, 500),
];

const PM10_BREAKPOINTS: [Breakpoint; 7] = [
    (0.0, 54.0, 0, 50),
    (55.0, 154.0, 51, 100),
    (155.0, 254.0, 101, 150),
    (255.0, 354.0, 151, 200),
    (355.0, 424.0, 201, 300),
    (425.0, 504.0, 301, 400),
    (505.0, 604.0, 401, 500),
];

pub fn pm25_aqi_us(concentration: f32) -> u16 {
    index_for(concentration, &PM25_BREAKPOINTS)
}

pub fn pm10_aqi_us(concentration: f32) -> u16 {
    index_for(concentration, &PM10_BREAKPOINTS)
}

fn index_for(concentration: f32, table: &[Breakpoint]) -> u16 {
    if concentration.is_nan() || concentration <= 0.0 {
        return 0;
    }

    // A band covers everything up to the start of the next band, so
    // concentrations falling between published ranges (e.g. 12.05) still
    // land in the lower band.
    for (i, &(c_low, c_high, i_low, i_high)) in table.iter().enumerate() {
        let upper = table.get(i + 1).map_or(c_high + 0.1, |next| next.0);
        if concentration < upper {
            return interpolate(concentration, c_low, c_high, i_low, i_high);
        }
    }

    AQI_MAX
}

fn interpolate(c: f32, c_low: f32, c_high: f32, i_low: u16, i_high: u16) -> u16 {
    let slope = f32::from(i_high - i_low) / (c_high - c_low);
    let index = slope * (c - c_low) + f32::from(i_low);
    (index.round() as u16).min(i_high)
}
