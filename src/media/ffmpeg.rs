//! ffmpeg/ffprobe subprocess plumbing.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde::Deserialize;

use crate::errors::{Result, VisageError};
use crate::vision::Frame;

/// Stream metadata from `ffprobe`.
#[derive(Debug, Clone)]
pub struct VideoMeta {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Total frames; 0 when the container does not declare a count.
    pub frame_count: i64,
}

#[derive(Deserialize)]
struct ProbeOutput {
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    nb_read_packets: Option<String>,
}

/// Reads stream metadata without opening a decode pipeline.
pub fn probe(path: &Path) -> Result<VideoMeta> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-count_packets",
            "-show_streams",
            "-print_format",
            "json",
        ])
        .arg(path)
        .output()
        .map_err(|e| VisageError::VideoOpenFailed(format!("{}: ffprobe: {e}", path.display())))?;

    if !output.status.success() {
        return Err(VisageError::VideoOpenFailed(format!(
            "{}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let parsed: ProbeOutput = serde_json::from_slice(&output.stdout)?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| VisageError::VideoOpenFailed(format!("{}: no video stream", path.display())))?;

    let fps = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_rational)
        .unwrap_or(30.0);
    let frame_count = stream
        .nb_frames
        .or(stream.nb_read_packets)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    Ok(VideoMeta {
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
        fps,
        frame_count,
    })
}

fn parse_rational(text: &str) -> Option<f64> {
    let (num, den) = text.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    if den == 0.0 {
        None
    } else {
        Some(num / den)
    }
}

/// Sequential raw-frame reader over a decoding ffmpeg process.
pub struct VideoReader {
    child: Child,
    stdout: ChildStdout,
    meta: VideoMeta,
    path: PathBuf,
    next_index: i64,
}

impl VideoReader {
    /// Opens the stream at frame 0.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_at(path, 0)
    }

    /// Opens the stream positioned at `start_frame` (decode-accurate seek).
    pub fn open_at(path: impl AsRef<Path>, start_frame: i64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let meta = probe(&path)?;
        if meta.width == 0 || meta.height == 0 {
            return Err(VisageError::VideoOpenFailed(format!(
                "{}: zero-sized video stream",
                path.display()
            )));
        }

        let mut command = Command::new("ffmpeg");
        command.args(["-v", "error", "-nostdin"]);
        command.arg("-i").arg(&path);
        if start_frame > 0 {
            // output-side seek decodes up to the target frame, keeping the
            // position exact for resume
            let seconds = start_frame as f64 / meta.fps;
            command.args(["-ss", &format!("{seconds:.6}")]);
        }
        command.args(["-f", "rawvideo", "-pix_fmt", "bgr24", "pipe:1"]);
        command.stdout(Stdio::piped()).stderr(Stdio::null());

        let mut child = command
            .spawn()
            .map_err(|e| VisageError::VideoOpenFailed(format!("{}: ffmpeg: {e}", path.display())))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VisageError::VideoOpenFailed(format!("{}: no pipe", path.display())))?;

        Ok(Self {
            child,
            stdout,
            meta,
            path,
            next_index: start_frame,
        })
    }

    #[must_use]
    pub fn meta(&self) -> &VideoMeta {
        &self.meta
    }

    /// Index the next `read_frame` will return.
    #[must_use]
    pub fn next_index(&self) -> i64 {
        self.next_index
    }

    /// Reads the next frame; `None` at end of stream.
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        let size = self.meta.width as usize * self.meta.height as usize * 3;
        let mut buffer = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            match self.stdout.read(&mut buffer[filled..]) {
                Ok(0) => {
                    if filled == 0 {
                        return Ok(None);
                    }
                    return Err(VisageError::VideoDecodeFailed(format!(
                        "{}: truncated frame at index {}",
                        self.path.display(),
                        self.next_index
                    )));
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(VisageError::VideoDecodeFailed(format!(
                        "{}: {e}",
                        self.path.display()
                    )))
                }
            }
        }

        let frame = Frame::from_bgr_bytes(self.meta.width, self.meta.height, buffer)
            .ok_or_else(|| {
                VisageError::VideoDecodeFailed(format!("{}: bad frame size", self.path.display()))
            })?;
        self.next_index += 1;
        Ok(Some(frame))
    }
}

impl Drop for VideoReader {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Raw-frame sink feeding an encoding ffmpeg process.
pub struct VideoWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    path: PathBuf,
}

impl VideoWriter {
    pub fn open(
        path: impl AsRef<Path>,
        width: u32,
        height: u32,
        fps: f64,
        encoder: &str,
        quality: u32,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut command = Command::new("ffmpeg");
        command.args(["-v", "error", "-y"]);
        command.args(["-f", "rawvideo", "-pix_fmt", "bgr24"]);
        command.args(["-s", &format!("{width}x{height}")]);
        command.args(["-r", &format!("{fps:.6}")]);
        command.args(["-i", "pipe:0"]);
        command.args(["-c:v", encoder]);
        for arg in quality_args(encoder, quality) {
            command.arg(arg);
        }
        command.args(["-pix_fmt", "yuv420p"]);
        command.arg(&path);
        command.stdin(Stdio::piped()).stderr(Stdio::null());

        let mut child = command.spawn().map_err(|e| {
            VisageError::OutputWriteFailed(format!("{}: ffmpeg: {e}", path.display()))
        })?;
        let stdin = child.stdin.take().ok_or_else(|| {
            VisageError::OutputWriteFailed(format!("{}: no pipe", path.display()))
        })?;

        Ok(Self {
            child,
            stdin: Some(stdin),
            path,
        })
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(VisageError::OutputWriteFailed(format!(
                "{}: writer already finished",
                self.path.display()
            )));
        };
        let bytes = frame.clone().into_bgr_bytes();
        stdin.write_all(&bytes).map_err(|e| {
            VisageError::OutputWriteFailed(format!("{}: {e}", self.path.display()))
        })
    }

    /// Closes the input pipe and waits for the encoder to flush.
    pub fn finish(mut self) -> Result<()> {
        drop(self.stdin.take());
        let status = self.child.wait().map_err(|e| {
            VisageError::OutputWriteFailed(format!("{}: {e}", self.path.display()))
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(VisageError::OutputWriteFailed(format!(
                "{}: encoder exited with {status}",
                self.path.display()
            )))
        }
    }
}

impl Drop for VideoWriter {
    fn drop(&mut self) {
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Remuxes the processed video with the original's audio tracks.
pub fn remux_audio(video: &Path, original: &Path, output: &Path) -> Result<()> {
    let status = Command::new("ffmpeg")
        .args(["-v", "error", "-y"])
        .arg("-i")
        .arg(video)
        .arg("-i")
        .arg(original)
        .args(["-c", "copy", "-map", "0:v:0", "-map", "1:a?", "-shortest"])
        .arg(output)
        .stderr(Stdio::null())
        .status()
        .map_err(|e| VisageError::OutputWriteFailed(format!("remux: {e}")))?;
    if status.success() {
        Ok(())
    } else {
        Err(VisageError::OutputWriteFailed(format!(
            "remux of {} exited with {status}",
            output.display()
        )))
    }
}

fn quality_args(encoder: &str, quality: u32) -> Vec<String> {
    let quality = quality.min(100);
    match encoder {
        "libx264" | "libx265" => {
            // 0..=100 maps inversely onto CRF 51..=0
            let crf = ((51.0 * (100.0 - quality as f64)) / 100.0).round() as u32;
            vec!["-crf".into(), crf.to_string()]
        }
        "mpeg4" => {
            // q:v 31 (worst) .. 1 (best)
            let q = (31.0 - 30.0 * quality as f64 / 100.0).round() as u32;
            vec!["-q:v".into(), q.max(1).to_string()]
        }
        _ => Vec::new(),
    }
}
