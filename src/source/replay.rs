use pcap::{Capture, Offline, PacketHeader};
use std::path::Path;
use tracing::info;

use crate::error::SourceError;
use crate::processor::{LinkLayer, RawFrame};

const LINKTYPE_ETHERNET: i32 = 1;
const LINKTYPE_RAW: i32 = 101;
const LINKTYPE_IPV4: i32 = 228;

/// Packet source that replays a pcap savefile, one frame at a time.
pub struct PcapReplay {
    capture: Capture<Offline>,
    link: LinkLayer,
}

impl PcapReplay {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let capture = Capture::from_file(path).map_err(|source| SourceError::Open {
            path: path.display().to_string(),
            source,
        })?;

        let link = match capture.get_datalink().0 {
            LINKTYPE_ETHERNET => LinkLayer::Ethernet,
            LINKTYPE_RAW | LINKTYPE_IPV4 => LinkLayer::RawIp,
            other => return Err(SourceError::UnsupportedLinkType(other)),
        };

        info!(path = %path.display(), ?link, "capture file opened");
        Ok(Self { capture, link })
    }

    pub fn link_layer(&self) -> LinkLayer {
        self.link
    }

    /// Hands every frame in the file to `on_frame`, in file order. Returns the
    /// number of frames delivered.
    pub fn for_each_frame(mut self, mut on_frame: impl FnMut(RawFrame)) -> Result<u64, SourceError> {
        let mut count = 0u64;
        loop {
            match self.capture.next_packet() {
                Ok(packet) => {
                    on_frame(Self::to_frame(packet.header, packet.data));
                    count += 1;
                }
                Err(pcap::Error::NoMorePackets) => break,
                Err(e) => return Err(e.into()),
            }
        }
        info!(frames = count, "capture file replayed");
        Ok(count)
    }

    fn to_frame(header: &PacketHeader, data: &[u8]) -> RawFrame {
        let timestamp = (header.ts.tv_sec as u64 * 1_000_000) + header.ts.tv_usec as u64;
        RawFrame { timestamp, wire_len: header.len, data: data.to_vec() }
    }
}
