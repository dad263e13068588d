//! CD-ROM drive probe.

use std::path::{Path, PathBuf};

use beacon_core::{Attributes, MediaContent, MediaId};

use super::{DeviceError, DiscScan, DriveProbe, DriveStatus};
use crate::media::MediaIdentity;

/// Frames per second of CD audio.
const FRAMES_PER_SECOND: u32 = 75;

/// Lead-in frames before LBA 0.
const LEAD_IN_FRAMES: u32 = 150;

/// One track from the table of contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TocTrack {
    number: u8,
    /// Start address in frames, lead-in excluded.
    lba: u32,
    data: bool,
}

/// Table of contents of a disc.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Toc {
    tracks: Vec<TocTrack>,
    leadout: u32,
}

impl Toc {
    fn is_audio(&self) -> bool {
        self.tracks.first().is_some_and(|t| !t.data)
    }

    /// CDDB disc id: checksum of track start seconds, total playing time in
    /// seconds and the track count.
    fn cddb_id(&self) -> u32 {
        let seconds = |lba: u32| (lba + LEAD_IN_FRAMES) / FRAMES_PER_SECOND;
        let checksum: u32 = self
            .tracks
            .iter()
            .map(|t| digit_sum(seconds(t.lba)))
            .sum();
        let first = self.tracks.first().map_or(0, |t| seconds(t.lba));
        let length = seconds(self.leadout).saturating_sub(first);
        ((checksum % 0xff) << 24) | (length << 8) | self.tracks.len() as u32
    }

    /// Length of each track in seconds.
    fn track_lengths(&self) -> Vec<f64> {
        self.tracks
            .iter()
            .enumerate()
            .map(|(i, track)| {
                let end = self.tracks.get(i + 1).map_or(self.leadout, |next| next.lba);
                f64::from(end.saturating_sub(track.lba)) / f64::from(FRAMES_PER_SECOND)
            })
            .collect()
    }
}

fn digit_sum(mut n: u32) -> u32 {
    let mut sum = 0;
    while n > 0 {
        sum += n % 10;
        n /= 10;
    }
    sum
}

/// Optical drive probed through the kernel's CD-ROM ioctls.
///
/// Audio discs are identified by their CDDB id, data discs by filesystem
/// UUID.
#[derive(Debug, Clone)]
pub struct CdromDrive {
    device: PathBuf,
}

impl CdromDrive {
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl DriveProbe for CdromDrive {
    fn device(&self) -> &Path {
        &self.device
    }

    fn status(&self) -> Result<DriveStatus, DeviceError> {
        sys::drive_status(&self.device)
    }

    fn identify(&self) -> Result<MediaId, DeviceError> {
        let toc = sys::read_toc(&self.device)?;
        if toc.is_audio() {
            Ok(MediaId::new(format!("cdda:{:08x}", toc.cddb_id())))
        } else {
            Ok(MediaIdentity::resolve(&self.device).media_id())
        }
    }

    fn scan(&self) -> Result<DiscScan, DeviceError> {
        let toc = sys::read_toc(&self.device)?;
        if !toc.is_audio() {
            return Ok(DiscScan::default());
        }

        let mut attributes = Attributes::new();
        attributes.insert("discid".into(), format!("{:08x}", toc.cddb_id()).into());
        let tracks = toc
            .tracks
            .iter()
            .zip(toc.track_lengths())
            .filter(|(track, _)| !track.data)
            .map(|(track, length)| {
                let mut track_attributes = Attributes::new();
                track_attributes.insert("trackno".into(), i64::from(track.number).into());
                track_attributes.insert("length".into(), length.into());
                track_attributes
            })
            .collect();

        Ok(DiscScan {
            content: MediaContent::Cdda,
            attributes,
            tracks,
        })
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use std::fs::{File, OpenOptions};
    use std::os::fd::AsRawFd;
    use std::os::unix::fs::OpenOptionsExt;
    use std::path::Path;

    use libc::{c_int, c_ulong};

    use super::{DeviceError, DriveStatus, Toc, TocTrack};

    const CDROMREADTOCHDR: c_ulong = 0x5305;
    const CDROMREADTOCENTRY: c_ulong = 0x5306;
    const CDROM_DRIVE_STATUS: c_ulong = 0x5326;
    const CDSL_CURRENT: c_int = c_int::MAX;
    const CDS_DISC_OK: c_int = 4;
    const CDROM_LBA: u8 = 0x01;
    const CDROM_LEADOUT: u8 = 0xAA;
    const CDROM_DATA_TRACK: u8 = 0x04;

    #[repr(C)]
    #[derive(Default)]
    struct TocHeader {
        first: u8,
        last: u8,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    union Address {
        msf: [u8; 3],
        lba: c_int,
    }

    #[repr(C)]
    struct TocEntry {
        track: u8,
        /// `adr` in the low nibble, `ctrl` in the high nibble.
        adr_ctrl: u8,
        format: u8,
        addr: Address,
        datamode: u8,
    }

    fn open(path: &Path) -> Result<File, DeviceError> {
        OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| DeviceError::Open {
                path: path.to_path_buf(),
                source,
            })
    }

    fn ioctl_err(path: &Path, request: &'static str) -> DeviceError {
        DeviceError::Ioctl {
            path: path.to_path_buf(),
            request,
            source: std::io::Error::last_os_error(),
        }
    }

    pub(super) fn drive_status(path: &Path) -> Result<DriveStatus, DeviceError> {
        let file = open(path)?;
        // SAFETY: CDROM_DRIVE_STATUS takes an integer slot argument and
        // the descriptor is open for the duration of the call.
        let status = unsafe { libc::ioctl(file.as_raw_fd(), CDROM_DRIVE_STATUS as _, CDSL_CURRENT) };
        if status < 0 {
            return Err(ioctl_err(path, "CDROM_DRIVE_STATUS"));
        }
        Ok(if status == CDS_DISC_OK {
            DriveStatus::DiscPresent
        } else {
            DriveStatus::NoDisc
        })
    }

    pub(super) fn read_toc(path: &Path) -> Result<Toc, DeviceError> {
        let file = open(path)?;
        let fd = file.as_raw_fd();

        let mut header = TocHeader::default();
        // SAFETY: `header` matches `struct cdrom_tochdr` and outlives the call.
        if unsafe { libc::ioctl(fd, CDROMREADTOCHDR as _, &mut header as *mut TocHeader) } < 0 {
            return Err(ioctl_err(path, "CDROMREADTOCHDR"));
        }
        if header.first == 0 || header.last < header.first {
            return Err(DeviceError::BadToc {
                path: path.to_path_buf(),
            });
        }

        let read_entry = |track: u8| -> Result<(u32, u8), DeviceError> {
            let mut entry = TocEntry {
                track,
                adr_ctrl: 0,
                format: CDROM_LBA,
                addr: Address { lba: 0 },
                datamode: 0,
            };
            // SAFETY: `entry` matches `struct cdrom_tocentry` and outlives
            // the call.
            if unsafe { libc::ioctl(fd, CDROMREADTOCENTRY as _, &mut entry as *mut TocEntry) } < 0 {
                return Err(ioctl_err(path, "CDROMREADTOCENTRY"));
            }
            // SAFETY: CDROM_LBA was requested, so the kernel filled `lba`.
            let lba = unsafe { entry.addr.lba };
            let lba = u32::try_from(lba).map_err(|_| DeviceError::BadToc {
                path: path.to_path_buf(),
            })?;
            Ok((lba, entry.adr_ctrl >> 4))
        };

        let tracks = (header.first..=header.last)
            .map(|number| {
                let (lba, ctrl) = read_entry(number)?;
                Ok(TocTrack {
                    number,
                    lba,
                    data: ctrl & CDROM_DATA_TRACK != 0,
                })
            })
            .collect::<Result<Vec<_>, DeviceError>>()?;
        let (leadout, _) = read_entry(CDROM_LEADOUT)?;

        Ok(Toc { tracks, leadout })
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use std::path::Path;

    use super::{DeviceError, DriveStatus, Toc};

    pub(super) fn drive_status(_path: &Path) -> Result<DriveStatus, DeviceError> {
        Err(DeviceError::Unsupported)
    }

    pub(super) fn read_toc(_path: &Path) -> Result<Toc, DeviceError> {
        Err(DeviceError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toc(starts: &[u32], leadout: u32) -> Toc {
        Toc {
            tracks: starts
                .iter()
                .enumerate()
                .map(|(i, lba)| TocTrack {
                    number: i as u8 + 1,
                    lba: *lba,
                    data: false,
                })
                .collect(),
            leadout,
        }
    }

    #[test]
    fn test_cddb_id() {
        // Tracks at 2s and 202s, lead-out at 402s.
        let toc = toc(&[0, 15000], 30000);
        assert_eq!(toc.cddb_id(), 0x0601_9002);
    }

    #[test]
    fn test_track_lengths() {
        let toc = toc(&[0, 750], 1500);
        assert_eq!(toc.track_lengths(), [10.0, 10.0]);
        assert!(toc.is_audio());
    }

    #[test]
    fn test_digit_sum() {
        assert_eq!(digit_sum(0), 0);
        assert_eq!(digit_sum(202), 4);
        assert_eq!(digit_sum(9_999), 36);
    }

    #[test]
    fn test_missing_drive_is_an_error() {
        let drive = CdromDrive::new("/nonexistent/cdrom");
        assert!(drive.status().is_err());
        assert!(drive.identify().is_err());
    }
}
