use crate::error::PipelineError;

/// The operating mode of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    Customize,
    Burn,
    BurnFile,
    Mount,
    Explore,
    ExtendOnly,
}

/// Raw mode switches as given on the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModeFlags {
    pub customize: bool,
    pub burn: bool,
    pub burnfile: bool,
    pub mount: bool,
    pub explore: bool,
    pub extend: bool,
    pub restart: bool,
    pub norestart: bool,
}

impl ModeFlags {
    fn get(&self, name: &str) -> bool {
        match name {
            "customize" => self.customize,
            "burn" => self.burn,
            "burnfile" => self.burnfile,
            "mount" => self.mount,
            "explore" => self.explore,
            "extend" => self.extend,
            "restart" => self.restart,
            "norestart" => self.norestart,
            _ => false,
        }
    }
}

/// Switch pairs that can never be combined.
const CONFLICTS: &[(&str, &str)] = &[
    ("customize", "burn"),
    ("customize", "burnfile"),
    ("customize", "mount"),
    ("customize", "explore"),
    ("burn", "burnfile"),
    ("burn", "mount"),
    ("burn", "explore"),
    ("burnfile", "mount"),
    ("burnfile", "explore"),
    ("mount", "explore"),
    ("extend", "burn"),
    ("extend", "burnfile"),
    ("restart", "norestart"),
];

/// Reject contradictory switches and resolve the single active mode.
///
/// With none of burn/mount/explore given, customize is the default, except
/// that a bare `--extend` only extends.
pub fn check_conflicts(flags: &ModeFlags) -> Result<ModeKind, PipelineError> {
    if let Some((first, second)) = CONFLICTS
        .iter()
        .find(|(a, b)| flags.get(a) && flags.get(b))
    {
        return Err(PipelineError::ConflictingSwitches {
            first: first.to_string(),
            second: second.to_string(),
        });
    }

    Ok(if flags.burn {
        ModeKind::Burn
    } else if flags.burnfile {
        ModeKind::BurnFile
    } else if flags.mount {
        ModeKind::Mount
    } else if flags.explore {
        ModeKind::Explore
    } else if flags.extend && !flags.customize {
        ModeKind::ExtendOnly
    } else {
        ModeKind::Customize
    })
}
