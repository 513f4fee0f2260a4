//! ffmpeg child processes for RTSP decode and encode
//!
//! Frames cross the process boundary as packed rgb24 at a fixed size, so
//! every frame on the pipe is exactly `width * height * 3` bytes.
//!
//! - `FrameSource` - ffmpeg decoding a stream to raw frames on stdout
//! - `FrameSink` - ffmpeg reading raw frames on stdin and publishing RTSP

use async_trait::async_trait;
use image::RgbImage;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

/// Fixed raw video geometry shared by decoder and encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl VideoFormat {
    #[inline]
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("stream closed")]
    Closed,
    #[error("frame is {got} bytes, expected {expected}")]
    FrameSize { got: usize, expected: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Anything that yields decoded frames until it fails
#[async_trait]
pub trait FrameStream: Send {
    async fn next_frame(&mut self) -> Result<RgbImage, StreamError>;
}

/// Arguments for decoding `url` into raw rgb24 on stdout
pub fn decode_args(url: &str, format: &VideoFormat) -> Vec<String> {
    let mut args: Vec<String> = vec!["-loglevel".into(), "error".into()];
    if url.starts_with("rtsp://") {
        args.extend(["-rtsp_transport".into(), "tcp".into()]);
    }
    args.extend([
        "-i".into(),
        url.to_string(),
        "-an".into(),
        "-vf".into(),
        format!("scale={}:{}", format.width, format.height),
        "-pix_fmt".into(),
        "rgb24".into(),
        "-f".into(),
        "rawvideo".into(),
        "pipe:1".into(),
    ]);
    args
}

/// Arguments for encoding raw rgb24 from stdin to a low-latency H.264 RTSP publish
pub fn encode_args(url: &str, format: &VideoFormat) -> Vec<String> {
    vec![
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgb24".into(),
        "-s".into(),
        format!("{}x{}", format.width, format.height),
        "-r".into(),
        format.fps.to_string(),
        "-i".into(),
        "-".into(),
        "-an".into(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-tune".into(),
        "zerolatency".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-f".into(),
        "rtsp".into(),
        "-rtsp_transport".into(),
        "tcp".into(),
        url.to_string(),
    ]
}

fn spawn_ffmpeg(
    program: &str,
    args: &[String],
    stdin: Stdio,
    stdout: Stdio,
) -> Result<Child, StreamError> {
    Command::new(program)
        .args(args)
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| StreamError::Spawn { program: program.to_string(), source })
}

/// Decoded frames from a stream address
pub struct FrameSource {
    url: String,
    format: VideoFormat,
    _child: Child,
    stdout: ChildStdout,
}

impl FrameSource {
    pub fn open(ffmpeg_bin: &str, url: &str, format: VideoFormat) -> Result<Self, StreamError> {
        let args = decode_args(url, &format);
        let mut child = spawn_ffmpeg(ffmpeg_bin, &args, Stdio::null(), Stdio::piped())?;
        let stdout = child.stdout.take().ok_or(StreamError::Closed)?;
        debug!(url = %url, width = %format.width, height = %format.height, "frame_source_opened");
        Ok(Self { url: url.to_string(), format, _child: child, stdout })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl FrameStream for FrameSource {
    async fn next_frame(&mut self) -> Result<RgbImage, StreamError> {
        let expected = self.format.frame_len();
        let mut buf = vec![0u8; expected];
        match self.stdout.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(StreamError::Closed),
            Err(e) => return Err(e.into()),
        }
        RgbImage::from_raw(self.format.width, self.format.height, buf)
            .ok_or(StreamError::FrameSize { got: expected, expected })
    }
}

/// Transcoder subprocess publishing annotated frames
pub struct FrameSink {
    format: VideoFormat,
    _child: Child,
    stdin: ChildStdin,
}

impl FrameSink {
    pub fn spawn(ffmpeg_bin: &str, url: &str, format: VideoFormat) -> Result<Self, StreamError> {
        let args = encode_args(url, &format);
        let mut child = spawn_ffmpeg(ffmpeg_bin, &args, Stdio::piped(), Stdio::null())?;
        let stdin = child.stdin.take().ok_or(StreamError::Closed)?;
        debug!(url = %url, fps = %format.fps, "frame_sink_spawned");
        Ok(Self { format, _child: child, stdin })
    }

    /// Blocking pipe write; a stalled encoder stalls the caller
    pub async fn write_frame(&mut self, frame: &RgbImage) -> Result<(), StreamError> {
        let raw = frame.as_raw();
        let expected = self.format.frame_len();
        if raw.len() != expected {
            return Err(StreamError::FrameSize { got: raw.len(), expected });
        }
        self.stdin.write_all(raw).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format() -> VideoFormat {
        VideoFormat { width: 1000, height: 500, fps: 25 }
    }

    #[test]
    fn test_frame_len() {
        assert_eq!(format().frame_len(), 1_500_000);
    }

    #[test]
    fn test_decode_args_rtsp() {
        let args = decode_args("rtsp://127.0.0.1:8554/live", &format());
        let joined = args.join(" ");
        assert!(joined.contains("-rtsp_transport tcp -i rtsp://127.0.0.1:8554/live"));
        assert!(joined.contains("scale=1000:500"));
        assert!(joined.ends_with("-pix_fmt rgb24 -f rawvideo pipe:1"));
    }

    #[test]
    fn test_decode_args_file_has_no_rtsp_transport() {
        let args = decode_args("/tmp/clip.mp4", &format());
        assert!(!args.iter().any(|a| a == "-rtsp_transport"));
        assert_eq!(args[2], "-i");
    }

    #[test]
    fn test_encode_args() {
        let args = encode_args("rtsp://127.0.0.1:8554/annotated", &format());
        let joined = args.join(" ");
        assert!(joined.contains("-s 1000x500 -r 25 -i -"));
        assert!(joined.contains("-c:v libx264 -preset veryfast -tune zerolatency"));
        assert_eq!(args.last().map(String::as_str), Some("rtsp://127.0.0.1:8554/annotated"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_source_reads_exact_frames_then_closes() {
        // `cat` over a raw file stands in for the decoder
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.raw");
        let small = VideoFormat { width: 2, height: 2, fps: 1 };
        let mut data = vec![10u8; small.frame_len()];
        data.extend(vec![20u8; small.frame_len()]);
        data.extend(vec![30u8; 5]); // trailing partial frame
        std::fs::write(&path, &data).unwrap();

        let mut child = Command::new("cat")
            .arg(&path)
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stdout = child.stdout.take().unwrap();
        let mut source = FrameSource { url: "test".into(), format: small, _child: child, stdout };

        let first = source.next_frame().await.unwrap();
        assert_eq!(first.get_pixel(0, 0).0, [10, 10, 10]);
        let second = source.next_frame().await.unwrap();
        assert_eq!(second.get_pixel(1, 1).0, [20, 20, 20]);
        assert!(matches!(source.next_frame().await, Err(StreamError::Closed)));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let result = FrameSource::open("/nonexistent/ffmpeg", "rtsp://x", format());
        assert!(matches!(result, Err(StreamError::Spawn { .. })));
    }
}
