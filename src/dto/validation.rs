//! Validation helpers for handshake parameters.

use validator::ValidationError;

const MAX_TIME_CONTROL_LEN: usize = 16;

/// Validates a "minutes+increment" time-control descriptor such as `5+3` or `10`.
///
/// # Examples
///
/// ```ignore
/// validate_time_control("5+3")   // Ok
/// validate_time_control("15")    // Ok
/// validate_time_control("5+3+1") // Err - two increments
/// validate_time_control("fast")  // Err - not numeric
/// ```
pub fn validate_time_control(value: &str) -> Result<(), ValidationError> {
    let value = value.trim();
    if value.len() > MAX_TIME_CONTROL_LEN {
        let mut err = ValidationError::new("time_control_length");
        err.message = Some(
            format!(
                "Time control must be at most {MAX_TIME_CONTROL_LEN} characters (got {})",
                value.len()
            )
            .into(),
        );
        return Err(err);
    }

    let mut parts = value.split('+');
    let well_formed = parts.next().is_some_and(is_number)
        && parts.next().is_none_or(is_number)
        && parts.next().is_none();
    if !well_formed {
        let mut err = ValidationError::new("time_control_format");
        err.message = Some("Time control must look like `minutes+increment`".into());
        return Err(err);
    }

    Ok(())
}

fn is_number(part: &str) -> bool {
    !part.is_empty() && part.chars().all(|c| c.is_ascii_digit())
}
