//! RTSP source on `retina`, using TCP-interleaved RTP.
//!
//! `retina` negotiates the session, keeps it alive and reassembles H.264
//! access units; this module picks the H.264 track and splits each access
//! unit into NAL units for the sink.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes};
use futures::StreamExt;
use retina::client::{
    Credentials, PlayOptions, Session, SessionGroup, SessionOptions, SetupOptions,
    TcpTransportOptions, Transport,
};
use retina::codec::{CodecItem, ParametersRef};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::SourceError;
use crate::nal::{NalUnit, NalUnitType};
use crate::{NalSink, SourceResult, UnitSource};

/// Connection settings for [`RtspSource`].
#[derive(Debug, Clone)]
pub struct RtspConfig {
    /// `rtsp://[user:pass@]host[:port]/path`
    pub url: String,

    /// Deadline for each step of the DESCRIBE/SETUP/PLAY exchange.
    pub connect_timeout: Duration,

    /// Longest silence tolerated while streaming.
    pub read_timeout: Duration,

    /// `User-Agent` header value.
    pub user_agent: String,
}

impl RtspConfig {
    /// Default settings for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            user_agent: concat!("nalu-relay/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Streams the first H.264 track of an RTSP presentation.
pub struct RtspSource {
    config: RtspConfig,
    url: Url,
    credentials: Option<(String, String)>,
}

impl RtspSource {
    /// Validate the URL; no connection is made until [`UnitSource::run`].
    pub fn new(config: RtspConfig) -> SourceResult<Self> {
        let mut url =
            Url::parse(&config.url).map_err(|e| SourceError::InvalidUrl(e.to_string()))?;

        if url.scheme() != "rtsp" {
            return Err(SourceError::InvalidUrl(
                "URL must start with rtsp://".to_string(),
            ));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(SourceError::InvalidUrl("missing host".to_string()));
        }

        let credentials = (!url.username().is_empty()).then(|| {
            (
                url.username().to_string(),
                url.password().unwrap_or_default().to_string(),
            )
        });

        // Credentials go to the session options, never into request URLs.
        url.set_username("")
            .and_then(|()| url.set_password(None))
            .map_err(|()| SourceError::InvalidUrl("cannot remove credentials".to_string()))?;

        Ok(Self {
            config,
            url,
            credentials,
        })
    }

    /// Request URL, without credentials.
    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn stream(&self, sink: &mut dyn NalSink) -> SourceResult<()> {
        let group = Arc::new(SessionGroup::default());
        let result = self.play(sink, Arc::clone(&group)).await;

        // The session is gone by now; wait for its TEARDOWN to go out.
        if let Err(e) = group.await_teardown().await {
            debug!("TEARDOWN failed: {}", e);
        }

        result
    }

    async fn play(&self, sink: &mut dyn NalSink, group: Arc<SessionGroup>) -> SourceResult<()> {
        let deadline = self.config.connect_timeout;
        let creds = self
            .credentials
            .clone()
            .map(|(username, password)| Credentials { username, password });
        let options = SessionOptions::default()
            .creds(creds)
            .user_agent(self.config.user_agent.clone())
            .session_group(group);

        let mut session =
            tokio::time::timeout(deadline, Session::describe(self.url.clone(), options))
                .await
                .map_err(|_| SourceError::Timeout(deadline))??;
        debug!(tracks = session.streams().len(), "Session described");

        let track = find_h264(
            session
                .streams()
                .iter()
                .map(|stream| (stream.media(), stream.encoding_name())),
        )
        .ok_or(SourceError::NoH264Track)?;
        info!(track, "Found H264 track");

        if let Some(ParametersRef::Video(params)) = session.streams()[track].parameters() {
            match parameter_sets(params.extra_data()) {
                Ok(sets) => {
                    for set in sets {
                        match set.nal_type {
                            NalUnitType::Sps => info!(len = set.len(), "SPS found"),
                            NalUnitType::Pps => info!(len = set.len(), "PPS found"),
                            other => debug!(nal_type = other.name(), "Unexpected parameter set"),
                        }
                    }
                }
                Err(e) => warn!("Ignoring parameter sets: {}", e),
            }
        }

        let setup =
            SetupOptions::default().transport(Transport::Tcp(TcpTransportOptions::default()));
        tokio::time::timeout(deadline, session.setup(track, setup))
            .await
            .map_err(|_| SourceError::Timeout(deadline))??;

        let playing = tokio::time::timeout(deadline, session.play(PlayOptions::default()))
            .await
            .map_err(|_| SourceError::Timeout(deadline))??;
        let mut frames = Box::pin(playing.demuxed()?);

        info!("Streaming started");

        let mut delivered: u64 = 0;
        loop {
            let item = tokio::time::timeout(self.config.read_timeout, frames.next())
                .await
                .map_err(|_| SourceError::Timeout(self.config.read_timeout))?;

            let frame = match item {
                None => return Err(SourceError::StreamEnded),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(CodecItem::VideoFrame(frame))) if frame.stream_id() == track => frame,
                Some(Ok(_)) => continue,
            };

            if frame.loss() > 0 {
                warn!(packets = frame.loss(), "RTP packets lost before frame");
            }

            if !deliver(Bytes::from(frame.into_data()), sink, &mut delivered)? {
                info!(delivered, "Sink closed, stopping source");
                return Ok(());
            }
        }
    }
}

impl UnitSource for RtspSource {
    #[instrument(name = "rtsp_source", skip_all, fields(url = %self.url))]
    fn run(&mut self, sink: &mut dyn NalSink) -> SourceResult<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.stream(sink))
    }
}

/// Index of the first H.264 video track among `(media, encoding)` pairs.
fn find_h264<'a>(tracks: impl Iterator<Item = (&'a str, &'a str)>) -> Option<usize> {
    tracks
        .enumerate()
        .find(|(_, (media, encoding))| *media == "video" && encoding.eq_ignore_ascii_case("h264"))
        .map(|(index, _)| index)
}

/// Hand every NAL unit of one access unit to `sink`.
///
/// Returns `false` once the sink refuses a unit.
fn deliver(frame: Bytes, sink: &mut dyn NalSink, delivered: &mut u64) -> SourceResult<bool> {
    for nal in split_access_unit(frame)? {
        debug!(
            "{:>16}({}): {}",
            nal.nal_type.name(),
            nal.type_code(),
            nal.len()
        );
        *delivered += 1;
        if !sink.push(nal) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Split an access unit of 4-byte length-prefixed NAL units.
fn split_access_unit(mut data: Bytes) -> SourceResult<Vec<NalUnit>> {
    let mut units = Vec::new();
    while data.has_remaining() {
        if data.remaining() < 4 {
            return Err(SourceError::Protocol(
                "truncated NAL length prefix".to_string(),
            ));
        }
        let len = data.get_u32() as usize;
        if len > data.remaining() {
            return Err(SourceError::Protocol(format!(
                "NAL unit of {} bytes overruns access unit",
                len
            )));
        }
        units.extend(NalUnit::new(data.split_to(len)));
    }
    Ok(units)
}

/// SPS and PPS units from an `AVCDecoderConfigurationRecord`.
fn parameter_sets(record: &[u8]) -> SourceResult<Vec<NalUnit>> {
    let malformed = || SourceError::Protocol("malformed AVC decoder configuration".to_string());

    let mut data = Bytes::copy_from_slice(record);
    if data.remaining() < 6 {
        return Err(malformed());
    }
    // version, profile, compatibility, level, length size
    data.advance(5);

    let mut sets = Vec::new();
    let sps_count = data.get_u8() & 0x1F;
    read_sets(&mut data, sps_count, &mut sets).ok_or_else(malformed)?;

    if !data.has_remaining() {
        return Err(malformed());
    }
    let pps_count = data.get_u8();
    read_sets(&mut data, pps_count, &mut sets).ok_or_else(malformed)?;

    Ok(sets)
}

fn read_sets(data: &mut Bytes, count: u8, sets: &mut Vec<NalUnit>) -> Option<()> {
    for _ in 0..count {
        if data.remaining() < 2 {
            return None;
        }
        let len = data.get_u16() as usize;
        if len > data.remaining() {
            return None;
        }
        sets.extend(NalUnit::new(data.split_to(len)));
    }
    Some(())
}
