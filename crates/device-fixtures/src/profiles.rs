use harness_proto::{Format, StreamKind, StreamProfile};

/// A resolution and the frame rates it is offered at.
pub(crate) struct Mode {
    pub width: u32,
    pub height: u32,
    pub fps: &'static [u32],
}

/// One stream/format pair offered across a set of modes.
pub(crate) struct ProfileSet {
    pub stream: StreamKind,
    pub index: u8,
    pub format: Format,
    pub modes: &'static [Mode],
}

pub(crate) const fn mode(width: u32, height: u32, fps: &'static [u32]) -> Mode {
    Mode { width, height, fps }
}

pub(crate) const fn set(
    stream: StreamKind,
    index: u8,
    format: Format,
    modes: &'static [Mode],
) -> ProfileSet {
    ProfileSet {
        stream,
        index,
        format,
        modes,
    }
}

/// Motion streams have no resolution; each rate is its own profile.
pub(crate) fn motion(stream: StreamKind, rates: &[u32]) -> Vec<StreamProfile> {
    rates
        .iter()
        .map(|&fps| StreamProfile {
            stream,
            index: 0,
            format: Format::MotionXyz32f,
            width: 0,
            height: 0,
            fps,
        })
        .collect()
}

pub(crate) fn expand(sets: &[ProfileSet]) -> Vec<StreamProfile> {
    let mut profiles = Vec::new();
    for set in sets {
        for mode in set.modes {
            for &fps in mode.fps {
                profiles.push(StreamProfile {
                    stream: set.stream,
                    index: set.index,
                    format: set.format,
                    width: mode.width,
                    height: mode.height,
                    fps,
                });
            }
        }
    }
    profiles
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODES: &[Mode] = &[mode(640, 480, &[15, 30]), mode(424, 240, &[90])];

    #[test]
    fn expands_every_mode_and_rate() {
        let profiles = expand(&[
            set(StreamKind::Depth, 0, Format::Z16, MODES),
            set(StreamKind::Infrared, 1, Format::Y8, MODES),
        ]);
        assert_eq!(profiles.len(), 6);
        assert_eq!(profiles[0].width, 640);
        assert_eq!(profiles[2].fps, 90);
        assert_eq!(profiles[3].stream, StreamKind::Infrared);
    }

    #[test]
    fn motion_profiles_have_no_resolution() {
        let gyro = motion(StreamKind::Gyro, &[200, 400]);
        assert_eq!(gyro.len(), 2);
        assert!(gyro.iter().all(|p| p.width == 0 && p.format == Format::MotionXyz32f));
    }
}
