//! Session description for the transcoder input.
//!
//! One media section per recorded stream, in the order the filter graphs
//! expect: video0, audio0, video1, audio1, ...

use crate::errors::SfuError;
use crate::media::rtp::RtpParameters;
use common::types::MediaKind;
use std::fmt::Write as _;

/// Everything the transcoder needs to receive one RTP stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpStream {
    pub kind: MediaKind,
    pub port: u16,
    pub payload_type: u8,
    pub codec_name: String,
    pub clock_rate: u32,
    pub channels: Option<u8>,
    pub ssrc: Option<u32>,
}

impl SdpStream {
    /// Describe a consumer's negotiated stream arriving on `port`.
    pub fn from_rtp_parameters(
        kind: MediaKind,
        port: u16,
        rtp_parameters: &RtpParameters,
    ) -> Result<Self, SfuError> {
        let codec = rtp_parameters.primary_codec().ok_or_else(|| {
            SfuError::Engine(format!("{kind} consumer has no negotiated codec"))
        })?;
        Ok(Self {
            kind,
            port,
            payload_type: codec.payload_type,
            codec_name: codec.codec_name().to_string(),
            clock_rate: codec.clock_rate,
            channels: codec.channels,
            ssrc: rtp_parameters.primary_ssrc(),
        })
    }

    fn write_section(&self, out: &mut String) {
        let kind = self.kind.as_str();
        let pt = self.payload_type;
        let _ = write!(out, "\nm={kind} {} RTP/AVP {pt}", self.port);
        let _ = write!(out, "\na=rtpmap:{pt} {}/{}", self.codec_name, self.clock_rate);
        if let Some(channels) = self.channels.filter(|c| *c > 0) {
            let _ = write!(out, "/{channels}");
        }
        if self.kind == MediaKind::Audio && self.codec_name.eq_ignore_ascii_case("opus") {
            let _ = write!(
                out,
                "\na=fmtp:{pt} minptime=10;useinbandfec=1;stereo=1;sprop-stereo=1"
            );
        }
        if let Some(ssrc) = self.ssrc.filter(|s| *s != 0) {
            let _ = write!(out, "\na=ssrc:{ssrc} cname:mediasoup-{kind}");
        }
    }
}

/// Build the complete description document.
#[must_use]
pub fn build_sdp(streams: &[SdpStream]) -> String {
    let mut out = String::from(
        "v=0\no=- 0 0 IN IP4 127.0.0.1\ns=Mediasoup Composite Recording\nc=IN IP4 127.0.0.1\nt=0 0",
    );
    for stream in streams {
        stream.write_section(&mut out);
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::media::rtp::{RtpCodecParameters, RtpEncodingParameters};

    fn video(port: u16) -> SdpStream {
        SdpStream {
            kind: MediaKind::Video,
            port,
            payload_type: 101,
            codec_name: "VP8".to_string(),
            clock_rate: 90000,
            channels: None,
            ssrc: Some(1111),
        }
    }

    fn audio(port: u16) -> SdpStream {
        SdpStream {
            kind: MediaKind::Audio,
            port,
            payload_type: 100,
            codec_name: "opus".to_string(),
            clock_rate: 48000,
            channels: Some(2),
            ssrc: Some(2222),
        }
    }

    #[test]
    fn test_build_sdp_single_participant() {
        let sdp = build_sdp(&[video(5000), audio(5002)]);
        let expected = "v=0\n\
o=- 0 0 IN IP4 127.0.0.1\n\
s=Mediasoup Composite Recording\n\
c=IN IP4 127.0.0.1\n\
t=0 0\n\
m=video 5000 RTP/AVP 101\n\
a=rtpmap:101 VP8/90000\n\
a=ssrc:1111 cname:mediasoup-video\n\
m=audio 5002 RTP/AVP 100\n\
a=rtpmap:100 opus/48000/2\n\
a=fmtp:100 minptime=10;useinbandfec=1;stereo=1;sprop-stereo=1\n\
a=ssrc:2222 cname:mediasoup-audio";
        assert_eq!(sdp, expected);
    }

    #[test]
    fn test_missing_ssrc_omits_line() {
        let mut stream = video(5000);
        stream.ssrc = None;
        let sdp = build_sdp(&[stream]);
        assert!(!sdp.contains("a=ssrc"));
    }

    #[test]
    fn test_media_sections_keep_order() {
        let sdp = build_sdp(&[video(1), audio(2), video(3), audio(4)]);
        let media: Vec<&str> = sdp.lines().filter(|l| l.starts_with("m=")).collect();
        assert_eq!(
            media,
            vec![
                "m=video 1 RTP/AVP 101",
                "m=audio 2 RTP/AVP 100",
                "m=video 3 RTP/AVP 101",
                "m=audio 4 RTP/AVP 100",
            ]
        );
    }

    #[test]
    fn test_from_rtp_parameters_reads_codec_and_ssrc() {
        let params = RtpParameters {
            codecs: vec![RtpCodecParameters {
                mime_type: "audio/opus".to_string(),
                payload_type: 100,
                clock_rate: 48000,
                channels: Some(2),
                parameters: serde_json::Map::new(),
            }],
            encodings: vec![RtpEncodingParameters { ssrc: Some(42) }],
            ..RtpParameters::default()
        };
        let stream = SdpStream::from_rtp_parameters(MediaKind::Audio, 6000, &params).unwrap();
        assert_eq!(stream.codec_name, "opus");
        assert_eq!(stream.ssrc, Some(42));
        assert!(
            SdpStream::from_rtp_parameters(MediaKind::Video, 6000, &RtpParameters::default())
                .is_err()
        );
    }
}
