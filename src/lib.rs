extern crate byteorder;
extern crate uuid;
#[macro_use]
extern crate log;
#[macro_use]
extern crate bitflags;
extern crate crc;
extern crate uuid_macros;

pub mod disk;
mod error;
pub(crate) mod utils;

pub use error::*;

pub mod part;
pub mod region;

pub use part::{
    Label, LabelFlags, LabelInfo, LabelType, PartContent, PartHandle, PartInfo, PartKind,
    PartSpec, PartType,
};

#[cfg(test)]
extern crate better_panic;

#[cfg(test)]
pub(crate) fn tests_init() {
    better_panic::install();

    // Several tests share the process, only the first logger wins.
    let _ = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}] {}",
                record.target(),
                record.level(),
                message
            ))
        })
        .level(log::LevelFilter::Trace)
        .chain(fern::Output::call(|record| println!("{}", record.args())))
        .apply();
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;
    use uuid_macros::uuid;

    #[test]
    fn test_uuid() {
        crate::tests_init();

        macro_rules! test {
            ($s:expr) => {{
                assert_eq!(uuid! {$s}, Uuid::parse_str($s).unwrap());
            }};
        }

        test! {"EBD0A0A2-B9E5-4433-87C0-68B6B72699C7"};
        test! {"0FC63DAF-8483-4772-8E79-3D69D8477DE4"};
        test! {"8308e350-4e2d-46c7-8e3b-24b07e8ac674"};
    }
}
