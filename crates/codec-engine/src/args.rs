//! ffmpeg argument builders shared by every encoder.

use reelkit_scene_model::job::{ArtifactFormat, OutputSpec};

/// Name of the `index`-th staged still in a frame sequence.
pub fn frame_file_name(index: u64) -> String {
    format!("frame_{index:05}.png")
}

/// Input pattern matching [`frame_file_name`].
pub const FRAME_PATTERN: &str = "frame_%05d.png";

/// Fixed video bitrate for lossy outputs.
const VIDEO_BITRATE: &str = "4000k";

/// GIF output is capped at this rate; palette quality drops sharply above it.
const GIF_MAX_FPS: u32 = 15;

/// Encoder arguments for the requested output format. Audio is always
/// dropped.
pub fn codec_args(output: &OutputSpec) -> Vec<String> {
    let mut args: Vec<String> = match output.format {
        ArtifactFormat::Mp4H264 => vec![
            "-c:v".into(),
            "libx264".into(),
            "-preset".into(),
            "veryfast".into(),
            "-profile:v".into(),
            "high".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-b:v".into(),
            VIDEO_BITRATE.into(),
            "-movflags".into(),
            "+faststart".into(),
        ],
        ArtifactFormat::WebmVp8 => vec![
            "-c:v".into(),
            "libvpx".into(),
            "-deadline".into(),
            "good".into(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-b:v".into(),
            VIDEO_BITRATE.into(),
        ],
        ArtifactFormat::Gif => vec![
            "-vf".into(),
            format!(
                "fps={},split[s0][s1];[s0]palettegen[p];[s1][p]paletteuse",
                output.fps.min(GIF_MAX_FPS)
            ),
            "-loop".into(),
            "0".into(),
        ],
    };
    args.push("-an".into());
    args
}

/// Encode a staged image sequence into `output_name`.
pub fn frame_sequence_args(output: &OutputSpec, output_name: &str) -> Vec<String> {
    let mut args = vec![
        "-framerate".to_string(),
        output.fps.to_string(),
        "-start_number".to_string(),
        "0".to_string(),
        "-i".to_string(),
        FRAME_PATTERN.to_string(),
    ];
    args.extend(codec_args(output));
    if output.format != ArtifactFormat::Gif {
        args.extend(["-r".to_string(), output.fps.to_string()]);
    }
    args.push(output_name.to_string());
    args
}

/// Re-encode a staged file into the requested format.
pub fn transcode_args(input_name: &str, output: &OutputSpec, output_name: &str) -> Vec<String> {
    let mut args = vec!["-i".to_string(), input_name.to_string()];
    args.extend(codec_args(output));
    if output.format != ArtifactFormat::Gif {
        args.extend(["-r".to_string(), output.fps.to_string()]);
    }
    args.push(output_name.to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_names_match_pattern_width() {
        assert_eq!(frame_file_name(0), "frame_00000.png");
        assert_eq!(frame_file_name(299), "frame_00299.png");
    }

    #[test]
    fn test_sequence_args_end_with_output() {
        let output = OutputSpec::default();
        let args = frame_sequence_args(&output, "reel.mp4");
        assert_eq!(args.last().map(String::as_str), Some("reel.mp4"));
        let joined = args.join(" ");
        assert!(joined.starts_with("-framerate 24 -start_number 0 -i frame_%05d.png"));
        assert!(joined.contains("libx264"));
        assert!(joined.contains("-an"));
    }

    #[test]
    fn test_gif_caps_frame_rate() {
        let output = OutputSpec {
            fps: 30,
            format: ArtifactFormat::Gif,
            ..OutputSpec::default()
        };
        let args = codec_args(&output);
        assert!(args.iter().any(|a| a.starts_with("fps=15,")));
        assert!(!transcode_args("in.webm", &output, "out.gif").contains(&"-r".to_string()));
    }
}
