use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OperationFlags: u32 {
        const INSTALL = 1;
        const UPDATE = 2;
        const NO_CHECK = 4;
        const REMOVE = 8;
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("No bootloader operation requested")]
    Empty,
    #[error("INSTALL and UPDATE cannot be requested together")]
    InstallAndUpdate,
    #[error("REMOVE cannot be combined with other operations")]
    RemoveCombined,
    #[error("NO_CHECK requires UPDATE")]
    NoCheckWithoutUpdate,
    #[error("Unknown operation bits: {0:#x}")]
    UnknownBits(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationRequest {
    Install,
    Update { force: bool },
    Remove,
}

impl OperationRequest {
    pub fn install() -> Self {
        Self::Install
    }

    pub fn update() -> Self {
        Self::Update { force: false }
    }

    pub fn force_update() -> Self {
        Self::Update { force: true }
    }

    pub fn remove() -> Self {
        Self::Remove
    }

    pub fn from_flags(flags: OperationFlags) -> Result<Self, RequestError> {
        let install = flags.contains(OperationFlags::INSTALL);
        let update = flags.contains(OperationFlags::UPDATE);
        let no_check = flags.contains(OperationFlags::NO_CHECK);

        if flags.contains(OperationFlags::REMOVE) {
            return if flags == OperationFlags::REMOVE {
                Ok(Self::Remove)
            } else {
                Err(RequestError::RemoveCombined)
            };
        }
        match (install, update) {
            (true, true) => Err(RequestError::InstallAndUpdate),
            // INSTALL never checks, so NO_CHECK is redundant there.
            (true, false) => Ok(Self::Install),
            (false, true) => Ok(Self::Update { force: no_check }),
            (false, false) if no_check => Err(RequestError::NoCheckWithoutUpdate),
            (false, false) => Err(RequestError::Empty),
        }
    }

    pub fn from_bits(bits: u32) -> Result<Self, RequestError> {
        let flags = OperationFlags::from_bits(bits).ok_or(RequestError::UnknownBits(bits))?;
        Self::from_flags(flags)
    }

    pub fn flags(&self) -> OperationFlags {
        match self {
            Self::Install => OperationFlags::INSTALL,
            Self::Update { force: false } => OperationFlags::UPDATE,
            Self::Update { force: true } => OperationFlags::UPDATE | OperationFlags::NO_CHECK,
            Self::Remove => OperationFlags::REMOVE,
        }
    }
}

impl TryFrom<OperationFlags> for OperationRequest {
    type Error = RequestError;

    fn try_from(flags: OperationFlags) -> Result<Self, Self::Error> {
        Self::from_flags(flags)
    }
}
