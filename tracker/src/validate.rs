use crate::errors::{Error, Result};
use crate::model::{HardwareUpload, LoginRequest};

const LAT_MIN: f64 = -90.0;
const LAT_MAX: f64 = 90.0;
const LON_MIN: f64 = -180.0;
const LON_MAX: f64 = 180.0;

/// Checks the coordinates of a hardware upload and returns them.
pub fn validate_upload(upload: &HardwareUpload) -> Result<(f64, f64)> {
    let (Some(latitude), Some(longitude)) = (upload.latitude, upload.longitude) else {
        return Err(Error::Validation("missing lat/lon".to_string()));
    };

    if !latitude.is_finite() || !(LAT_MIN..=LAT_MAX).contains(&latitude) {
        return Err(Error::Validation(format!(
            "Latitude {} out of range [{}, {}]",
            latitude, LAT_MIN, LAT_MAX
        )));
    }

    if !longitude.is_finite() || !(LON_MIN..=LON_MAX).contains(&longitude) {
        return Err(Error::Validation(format!(
            "Longitude {} out of range [{}, {}]",
            longitude, LON_MIN, LON_MAX
        )));
    }

    Ok((latitude, longitude))
}

/// Returns `(username, password)` when both are present and non-empty.
pub fn validate_login(request: &LoginRequest) -> Result<(&str, &str)> {
    match (request.username.as_deref(), request.password.as_deref()) {
        (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
            Ok((username, password))
        }
        _ => Err(Error::Validation("Missing credentials".to_string())),
    }
}
