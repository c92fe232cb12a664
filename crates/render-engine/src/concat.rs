//! Multi-clip concatenation inside the codec engine.
//!
//! Each clip is staged, probed and normalized on its own: fit-inside scale,
//! symmetric letterbox padding to the exact output size, resample to the
//! output frame rate, audio dropped, fixed H.264 parameters. Because every
//! normalized clip shares those parameters, the join is a demuxer-level
//! concat with no re-encode at the seams.

use std::sync::Arc;
use std::time::Duration;

use reelkit_codec_engine::{codec_args, EngineLease, EngineSession, ExecObserver};
use reelkit_common::clock::with_timeout;
use reelkit_common::error::ReelResult;
use reelkit_common::progress::StageProgress;
use reelkit_compositor::geometry::{letterbox, Letterbox};
use reelkit_scene_model::clip::{total_clip_duration_secs, Clip};
use reelkit_scene_model::color::Color;
use reelkit_scene_model::job::{ArtifactFormat, OutputSpec};

/// Concat demuxer input list.
pub const CONCAT_LIST: &str = "concat.txt";

/// Progress reporters for the engine path of a multi-clip reel.
#[derive(Debug, Clone)]
pub struct ConcatStages {
    pub load: StageProgress,
    pub normalize: StageProgress,
    pub join: StageProgress,
}

pub struct ConcatPipeline {
    session: Arc<EngineSession>,
    exec_timeout: Duration,
    pad: Color,
}

impl ConcatPipeline {
    pub fn new(session: Arc<EngineSession>, exec_timeout: Duration, pad: Color) -> Self {
        Self {
            session,
            exec_timeout,
            pad,
        }
    }

    /// Normalize and join `clips`. The staging area is empty again when
    /// this returns.
    pub async fn run(
        &self,
        clips: &[Clip],
        output: &OutputSpec,
        stages: &ConcatStages,
    ) -> ReelResult<Vec<u8>> {
        stages.load.begin();
        let lease = self.session.acquire().await?;
        stages.load.complete();
        tracing::info!(engine = %lease.describe(), clips = clips.len(), "Concatenation started");

        let result = self.run_leased(&lease, clips, output, stages).await;
        let removed = lease.release().await;
        tracing::debug!(removed, "Concatenation staging released");
        result
    }

    async fn run_leased(
        &self,
        lease: &EngineLease,
        clips: &[Clip],
        output: &OutputSpec,
        stages: &ConcatStages,
    ) -> ReelResult<Vec<u8>> {
        let parts = stages.normalize.split(clips.len());
        let mut normalized = Vec::with_capacity(clips.len());
        for (index, (clip, part)) in clips.iter().zip(parts).enumerate() {
            normalized.push(self.normalize(lease, index, clip, output, &part).await?);
        }

        stages.join.begin();
        lease
            .write(CONCAT_LIST, concat_list(&normalized).as_bytes())
            .await?;
        let output_name = format!("reel.{}", output.format.extension());
        let expected_secs = total_clip_duration_secs(clips);
        let join = stages.join.clone();
        let observer: ExecObserver = Arc::new(move |p| join.report(p.fraction_of(expected_secs)));
        with_timeout(
            "concat",
            self.exec_timeout,
            lease.exec(&join_args(output, &output_name), Some(observer)),
        )
        .await??;
        stages.join.complete();

        lease.read(&output_name).await
    }

    async fn normalize(
        &self,
        lease: &EngineLease,
        index: usize,
        clip: &Clip,
        output: &OutputSpec,
        progress: &StageProgress,
    ) -> ReelResult<String> {
        progress.begin();
        let input = format!("input_{index:03}.{}", clip.extension);
        {
            let bytes = clip.read_bytes().await?;
            lease.write(&input, &bytes).await?;
        }

        let probe = match clip.probed() {
            Some(probe) => probe,
            None => clip.record_probe(lease.probe(&input).await?.to_clip_probe()),
        };
        let fit = letterbox(probe.width, probe.height, output.width, output.height);
        tracing::info!(
            clip = index,
            source = %format!("{}x{}@{:.2}", probe.width, probe.height, probe.fps),
            scaled = %format!("{}x{}", fit.scaled_width, fit.scaled_height),
            padded = fit.is_padded(),
            "Normalizing clip"
        );

        let name = format!("norm_{index:03}.mp4");
        let args = normalize_args(&input, clip.duration_secs, &fit, output, self.pad, &name);
        let part = progress.clone();
        let duration = clip.duration_secs;
        let observer: ExecObserver = Arc::new(move |p| part.report(p.fraction_of(duration)));
        with_timeout(
            "normalize",
            self.exec_timeout,
            lease.exec(&args, Some(observer)),
        )
        .await??;

        // Inputs can be large; free them before the next clip is staged.
        lease.delete(&input).await?;
        progress.complete();
        Ok(name)
    }
}

/// Normalization arguments for one staged clip.
pub fn normalize_args(
    input: &str,
    duration_secs: f64,
    fit: &Letterbox,
    output: &OutputSpec,
    pad: Color,
    output_name: &str,
) -> Vec<String> {
    let filter = format!(
        "scale={}:{}:flags=lanczos,pad={}:{}:{}:{}:color=0x{:02x}{:02x}{:02x},fps={},setsar=1",
        fit.scaled_width,
        fit.scaled_height,
        output.width,
        output.height,
        fit.pad_x,
        fit.pad_y,
        pad.r,
        pad.g,
        pad.b,
        output.fps,
    );
    let intermediate = OutputSpec {
        format: ArtifactFormat::Mp4H264,
        ..*output
    };
    let mut args = vec![
        "-i".to_string(),
        input.to_string(),
        "-t".to_string(),
        format_secs(duration_secs),
        "-vf".to_string(),
        filter,
    ];
    args.extend(codec_args(&intermediate));
    args.extend([
        "-r".to_string(),
        output.fps.to_string(),
        "-video_track_timescale".to_string(),
        "90000".to_string(),
        output_name.to_string(),
    ]);
    args
}

/// Join arguments. MP4 output is a straight stream copy; other containers
/// re-encode the joined stream once.
pub fn join_args(output: &OutputSpec, output_name: &str) -> Vec<String> {
    let mut args = vec![
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        CONCAT_LIST.to_string(),
    ];
    match output.format {
        ArtifactFormat::Mp4H264 => args.extend([
            "-c".to_string(),
            "copy".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
        ]),
        _ => args.extend(codec_args(output)),
    }
    args.push(output_name.to_string());
    args
}

/// Concat demuxer list for staged files, in order.
pub fn concat_list(names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!("file '{}'\n", name.replace('\'', "'\\''")))
        .collect()
}

/// Frames in the joined output: each clip contributes its duration rounded
/// to whole frames at the output rate.
pub fn normalized_frame_count(clips: &[Clip], fps: u32) -> u64 {
    clips
        .iter()
        .map(|c| (c.duration_secs.max(0.0) * fps as f64).round() as u64)
        .sum()
}

fn format_secs(secs: f64) -> String {
    let s = format!("{:.3}", secs.max(0.0));
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landscape_clip_is_letterboxed_symmetrically() {
        let output = OutputSpec::default();
        let fit = letterbox(1280, 720, output.width, output.height);
        let args = normalize_args("input_000.mp4", 10.0, &fit, &output, Color::BLACK, "norm_000.mp4");
        let vf = &args[args.iter().position(|a| a == "-vf").unwrap() + 1];
        assert!(vf.starts_with("scale=1080:608:flags=lanczos,pad=1080:1920:0:656:color=0x000000"));
        assert!(vf.ends_with("fps=24,setsar=1"));
        assert_eq!(args[2..4], ["-t".to_string(), "10".to_string()]);
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"-an".to_string()));
    }

    #[test]
    fn test_portrait_clip_needs_no_padding() {
        let output = OutputSpec::default();
        let fit = letterbox(720, 1280, output.width, output.height);
        assert!(!fit.is_padded());
        let args = normalize_args("in.mov", 2.5, &fit, &output, Color::BLACK, "out.mp4");
        assert!(args.contains(&"2.5".to_string()));
    }

    #[test]
    fn test_join_copies_mp4_and_reencodes_others() {
        let mp4 = join_args(&OutputSpec::default(), "reel.mp4");
        assert!(mp4.windows(2).any(|w| w[0] == "-c" && w[1] == "copy"));

        let webm = OutputSpec {
            format: ArtifactFormat::WebmVp8,
            ..OutputSpec::default()
        };
        let args = join_args(&webm, "reel.webm");
        assert!(args.contains(&"libvpx".to_string()));
        assert!(!args.contains(&"copy".to_string()));
    }

    #[test]
    fn test_concat_list_quotes_names() {
        let list = concat_list(&["norm_000.mp4".to_string(), "it's.mp4".to_string()]);
        assert_eq!(list, "file 'norm_000.mp4'\nfile 'it'\\''s.mp4'\n");
    }

    #[test]
    fn test_three_clips_make_45_seconds() {
        let clips = vec![
            Clip::from_path("a.mp4", 10.0),
            Clip::from_path("b.mp4", 15.0),
            Clip::from_path("c.mp4", 20.0),
        ];
        assert_eq!(normalized_frame_count(&clips, 24), 1080);
        assert!((total_clip_duration_secs(&clips) - 45.0).abs() < 1e-9);
    }
}
