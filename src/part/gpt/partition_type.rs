use uuid::Uuid;
use uuid_macros::uuid;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum GptPartitionType {
    EfiSystem,
    MicrosoftBasicData,
    LinuxFilesystem,
    LinuxSwap,
    Minix,
}

impl GptPartitionType {
    const ALL: [Self; 5] = [
        Self::EfiSystem,
        Self::MicrosoftBasicData,
        Self::LinuxFilesystem,
        Self::LinuxSwap,
        Self::Minix,
    ];

    pub fn to_guid(self) -> Uuid {
        match self {
            Self::EfiSystem => uuid! {"C12A7328-F81F-11D2-BA4B-00A0C93EC93B"},
            Self::MicrosoftBasicData => uuid! {"EBD0A0A2-B9E5-4433-87C0-68B6B72699C7"},
            Self::LinuxFilesystem => uuid! {"0FC63DAF-8483-4772-8E79-3D69D8477DE4"},
            Self::LinuxSwap => uuid! {"0657FD6D-A4AB-43C4-84E5-0933C84B4F4F"},
            Self::Minix => uuid! {"8308E350-4E2D-46C7-8E3B-24B07E8AC674"},
        }
    }

    pub fn from_guid(guid: &Uuid) -> Option<Self> {
        Self::ALL.iter().copied().find(|x| x.to_guid() == *guid)
    }
}

#[cfg(test)]
#[test]
fn test_partition_type_guid() {
    crate::tests_init();

    for t in GptPartitionType::ALL.iter() {
        assert_eq!(GptPartitionType::from_guid(&t.to_guid()), Some(*t));
    }

    assert_eq!(
        GptPartitionType::from_guid(&Uuid::parse_str("ebd0a0a2-b9e5-4433-87c0-68b6b72699c7").unwrap()),
        Some(GptPartitionType::MicrosoftBasicData)
    );
    assert_eq!(GptPartitionType::from_guid(&Uuid::nil()), None);
}
