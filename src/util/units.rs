// Unit conventions shared across the bench.
// optical axes are in nm and THz (c = 3e5 nm*THz), powers in W on the wire,
// mW/dBm at the instrument panels, electrical quantities in V and Hz.

// Speed of light expressed so that wavelength_nm * frequency_thz = C_NM_THZ.
pub const C_NM_THZ: f64 = 3.0e5;

// Speed of light in vacuum (m/s), as used by the OTDR range calculation.
pub const C_M_PER_S: f64 = 3.0e8;

// Natural log to decibel conversion factor: 10 / ln(10) ~= 4.343.
pub const LN_TO_DB: f64 = 4.343;

// Floor value (dB) below which magnitudes are clamped on display.
pub const DB_FLOOR: f64 = -300.0;

// Minimum linear value to avoid log(0) in dB conversions.
const LINEAR_EPSILON: f64 = 1.0e-30;

#[inline]
pub fn wavelength_to_thz(wavelength_nm: f64) -> f64 {
    C_NM_THZ / wavelength_nm
}

#[inline]
pub fn thz_to_wavelength(frequency_thz: f64) -> f64 {
    C_NM_THZ / frequency_thz
}

// mW = 10^(dBm/10)
#[inline]
pub fn dbm_to_mw(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

// dBm = 10*log10(mW)
#[inline]
pub fn mw_to_dbm(mw: f64) -> f64 {
    10.0 * mw.log10()
}

// Insertion loss / gain in dB to a linear power factor.
#[inline]
pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

// Convert a power-like quantity to dB (10*log10) with a floor.
#[inline]
pub fn power_to_db(power: f64) -> f64 {
    if power > LINEAR_EPSILON {
        (10.0 * power.log10()).max(DB_FLOOR)
    } else {
        DB_FLOOR
    }
}

// Convert an amplitude-like quantity (voltage) to dB (20*log10) with a floor.
#[inline]
pub fn amplitude_to_db(amplitude: f64) -> f64 {
    if amplitude > LINEAR_EPSILON {
        (20.0 * amplitude.log10()).max(DB_FLOOR)
    } else {
        DB_FLOOR
    }
}

// Exponential power transmission of a lossy span: exp(-(dB/km / 4.343) * km).
#[inline]
pub fn span_transmission(loss_db_per_km: f64, length_km: f64) -> f64 {
    (-(loss_db_per_km / LN_TO_DB) * length_km).exp()
}

/// Which decibel law applies to a displayed quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbLaw {
    /// 20*log10, for voltages and field amplitudes.
    Amplitude,
    /// 10*log10, for optical and electrical powers.
    Power,
}

impl DbLaw {
    #[inline]
    pub fn apply(self, value: f64) -> f64 {
        match self {
            DbLaw::Amplitude => amplitude_to_db(value),
            DbLaw::Power => power_to_db(value),
        }
    }
}

// Value of a 1-2-5 stepped dial: `base` is the value at step 0.
// e.g. base 1e-12 -> 1p, 2p, 5p, 10p, 20p, ...
pub fn one_two_five(step: u32, base: f64) -> f64 {
    const MANTISSAS: [f64; 3] = [1.0, 2.0, 5.0];
    let decade = 10f64.powi((step / 3) as i32);
    base * MANTISSAS[(step % 3) as usize] * decade
}

// Render a value with an SI prefix ("200 n", "5 M"); falls back to scientific
// notation outside the prefix table.
pub fn format_si(value: f64) -> String {
    const PREFIXES: [(i32, &str); 21] = [
        (-10, "q"),
        (-9, "r"),
        (-8, "y"),
        (-7, "z"),
        (-6, "a"),
        (-5, "f"),
        (-4, "p"),
        (-3, "n"),
        (-2, "u"),
        (-1, "m"),
        (0, " "),
        (1, "K"),
        (2, "M"),
        (3, "G"),
        (4, "T"),
        (5, "P"),
        (6, "E"),
        (7, "Z"),
        (8, "Y"),
        (9, "R"),
        (10, "Q"),
    ];

    if value == 0.0 || !value.is_finite() {
        return format!("{value:.5e}");
    }
    let exponent = value.abs().log10().floor() as i32;
    let group = exponent.div_euclid(3);
    match PREFIXES.iter().find(|(g, _)| *g == group) {
        Some((_, prefix)) => {
            let scaled = value / 10f64.powi(group * 3);
            format!("{scaled:.0} {prefix}")
        }
        None => format!("{value:.5e}"),
    }
}
