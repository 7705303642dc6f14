//! Unit conversions and physical defaults.
//!
//! Lengths follow whatever unit the attenuation coefficient is quoted in
//! (km with dB/km for fiber, m with dB/m for free space). Altitudes and
//! beam sizes are always metres; angles are degrees at the API boundary.

/// Pi
pub const PI: f64 = std::f64::consts::PI;

/// Photon source repetition rate used by the link budget (Hz).
pub const DEFAULT_SOURCE_RATE_HZ: f64 = 72.6e6;

/// Clear-air extinction used by the free-space presets (dB/m).
pub const DEFAULT_FSO_EXTINCTION_DB_PER_M: f64 = 0.43e-3;

/// Linear transmittance of a path with the given total loss in dB.
pub fn db_to_transmittance(loss_db: f64) -> f64 {
    10f64.powf(-loss_db / 10.0)
}

/// Total path loss in dB for a path of `length` at `loss_per_unit` dB per unit length.
pub fn path_loss_db(length: f64, loss_per_unit: f64) -> f64 {
    length * loss_per_unit
}

/// Secant of a zenith angle given in degrees.
pub fn sec_deg(zenith_deg: f64) -> f64 {
    1.0 / zenith_deg.to_radians().cos()
}

/// Slant range (m) from a ground station at `h_ground` to a source at `h_source`,
/// both altitudes in metres, seen at `zenith_deg`.
pub fn slant_range_m(h_ground: f64, h_source: f64, zenith_deg: f64) -> f64 {
    (h_source - h_ground) * sec_deg(zenith_deg)
}
