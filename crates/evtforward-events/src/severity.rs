/// Platform severity levels, mapped to the facility/severity numbers the
/// collector expects rather than the platform's own native scale.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Severity {
    Critical,
    Error,
    Warning,
    Informational,
    Verbose,
    /// Any level the platform reports that isn't one of the five named
    /// ones (including "always notice").
    Other,
}

impl Severity {
    pub fn code(self) -> u8 {
        match self {
            Severity::Critical => 2,
            Severity::Error => 3,
            Severity::Warning => 4,
            Severity::Other => 5,
            Severity::Informational => 6,
            Severity::Verbose => 7,
        }
    }
}
