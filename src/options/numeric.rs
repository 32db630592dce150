use crate::error::PipelineError;

/// Ensure `value` is non-empty and made only of ASCII digits.
pub fn require_digits(option: &str, value: &str) -> Result<(), PipelineError> {
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(());
    }
    Err(PipelineError::NotNumeric {
        option: option.to_string(),
        value: value.to_string(),
    })
}

/// Digits-only check followed by conversion.
pub fn parse_digits(option: &str, value: &str) -> Result<u64, PipelineError> {
    require_digits(option, value)?;
    value.parse().map_err(|_| PipelineError::NotNumeric {
        option: option.to_string(),
        value: value.to_string(),
    })
}

/// HDMI group and mode only make sense together.
pub fn validate_hdmi_pair(
    group: Option<&str>,
    mode: Option<&str>,
) -> Result<Option<(String, String)>, PipelineError> {
    match (group, mode) {
        (None, None) => Ok(None),
        (Some(_), None) => Err(PipelineError::MissingPairedOption {
            given: "hdmigroup".to_string(),
            missing: "hdmimode".to_string(),
        }),
        (None, Some(_)) => Err(PipelineError::MissingPairedOption {
            given: "hdmimode".to_string(),
            missing: "hdmigroup".to_string(),
        }),
        (Some(group), Some(mode)) => {
            require_digits("hdmigroup", group)?;
            require_digits("hdmimode", mode)?;
            Ok(Some((group.to_string(), mode.to_string())))
        }
    }
}
