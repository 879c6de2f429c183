//! Transcoder command line and filter graphs.
//!
//! Input streams are numbered in SDP order, so participant `i` has video at
//! `0:{2i}` and audio at `0:{2i+1}`.

use super::layout::GridLayout;
use std::ffi::OsString;
use std::path::Path;

/// Video graph: scale every participant to a cell, stack cells into rows and
/// rows into the final frame. Output label is `[vout]`.
#[must_use]
pub fn video_filter(participants: usize, grid: &GridLayout) -> String {
    if participants <= 1 {
        return format!(
            "[0:0]scale={}:{},setpts=PTS-STARTPTS[vout]",
            grid.output_width, grid.output_height
        );
    }

    let mut parts: Vec<String> = (0..participants)
        .map(|i| {
            format!(
                "[0:{}]scale={}:{},setpts=PTS-STARTPTS[v{i}]",
                2 * i,
                grid.cell_width,
                grid.cell_height
            )
        })
        .collect();

    let cols = usize::try_from(grid.cols).unwrap_or(1).max(1);
    let mut row_labels = Vec::new();
    let indices: Vec<usize> = (0..participants).collect();
    for (row, cells) in indices.chunks(cols).enumerate() {
        let inputs: String = cells.iter().map(|i| format!("[v{i}]")).collect();
        let label = format!("[row{row}]");
        let pad = format!("pad={}:{}", grid.output_width, grid.cell_height);
        if cells.len() == 1 {
            parts.push(format!("{inputs}{pad}{label}"));
        } else if cells.len() == cols {
            parts.push(format!("{inputs}hstack=inputs={}{label}", cells.len()));
        } else {
            parts.push(format!(
                "{inputs}hstack=inputs={}[row{row}_tmp]",
                cells.len()
            ));
            parts.push(format!("[row{row}_tmp]{pad}{label}"));
        }
        row_labels.push(label);
    }

    if row_labels.len() == 1 {
        parts.push("[row0]copy[vout]".to_string());
    } else {
        parts.push(format!(
            "{}vstack=inputs={}[vout]",
            row_labels.concat(),
            row_labels.len()
        ));
    }

    parts.join("; ")
}

/// Audio graph: mix every participant with unity gain per input, then
/// attenuate by `1/sqrt(n)`. Output label is `[aout]`.
#[must_use]
pub fn audio_filter(participants: usize) -> String {
    if participants <= 1 {
        return "[0:1]anull[aout]".to_string();
    }

    let inputs: String = (0..participants)
        .map(|i| format!("[0:{}]", 2 * i + 1))
        .collect();
    let gain = u32::try_from(participants).map_or(0.0, |n| 1.0 / f64::from(n).sqrt());
    format!(
        "{inputs}amix=inputs={participants}:duration=longest:dropout_transition=2:normalize=0,volume={gain}[aout]"
    )
}

/// Full transcoder argument list for a composite recording.
#[must_use]
pub fn transcoder_args(
    sdp_path: &Path,
    output_path: &Path,
    participants: usize,
    grid: &GridLayout,
) -> Vec<OsString> {
    let filter = format!(
        "{}; {}",
        video_filter(participants, grid),
        audio_filter(participants)
    );

    let mut args: Vec<OsString> = [
        "-loglevel",
        "debug",
        "-protocol_whitelist",
        "file,rtp,udp",
        "-fflags",
        "+genpts+discardcorrupt+igndts",
        "-reorder_queue_size",
        "10000",
        "-max_delay",
        "20000000",
        "-analyzeduration",
        "20000000",
        "-probesize",
        "20000000",
        "-rtbufsize",
        "200M",
        "-thread_queue_size",
        "4096",
        "-i",
    ]
    .iter()
    .map(OsString::from)
    .collect();
    args.push(sdp_path.as_os_str().to_os_string());

    args.push("-filter_complex".into());
    args.push(filter.into());

    args.extend(
        [
            "-map",
            "[vout]",
            "-map",
            "[aout]",
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-preset",
            "ultrafast",
            "-tune",
            "zerolatency",
            "-crf",
            "23",
            "-g",
            "60",
            "-sc_threshold",
            "0",
            "-c:a",
            "aac",
            "-ar",
            "48000",
            "-ac",
            "2",
            "-b:a",
            "192k",
            "-flags",
            "+global_header",
            "-movflags",
            "+faststart",
            "-y",
        ]
        .iter()
        .map(OsString::from),
    );
    args.push(output_path.as_os_str().to_os_string());
    args
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_single_participant_graph() {
        let grid = GridLayout::compute(1, 1280, 720).unwrap();
        assert_eq!(
            video_filter(1, &grid),
            "[0:0]scale=1280:720,setpts=PTS-STARTPTS[vout]"
        );
        assert_eq!(audio_filter(1), "[0:1]anull[aout]");
    }

    #[test]
    fn test_two_participants_single_row() {
        let grid = GridLayout::compute(2, 1920, 1080).unwrap();
        assert_eq!(
            video_filter(2, &grid),
            "[0:0]scale=960:1080,setpts=PTS-STARTPTS[v0]; \
[0:2]scale=960:1080,setpts=PTS-STARTPTS[v1]; \
[v0][v1]hstack=inputs=2[row0]; \
[row0]copy[vout]"
        );
    }

    #[test]
    fn test_three_participants_pads_short_row() {
        let grid = GridLayout::compute(3, 1920, 1080).unwrap();
        let graph = video_filter(3, &grid);
        assert!(graph.contains("[v0][v1]hstack=inputs=2[row0]"));
        assert!(graph.contains("[v2]pad=1920:540[row1]"));
        assert!(graph.ends_with("[row0][row1]vstack=inputs=2[vout]"));
    }

    #[test]
    fn test_five_participants_partial_row_uses_tmp_label() {
        let grid = GridLayout::compute(5, 1920, 1080).unwrap();
        let graph = video_filter(5, &grid);
        assert!(graph.contains("[v0][v1][v2]hstack=inputs=3[row0]"));
        assert!(graph.contains("[v3][v4]hstack=inputs=2[row1_tmp]"));
        assert!(graph.contains("[row1_tmp]pad=1920:540[row1]"));
    }

    #[test]
    fn test_audio_mix_attenuates_by_sqrt() {
        assert_eq!(
            audio_filter(4),
            "[0:1][0:3][0:5][0:7]amix=inputs=4:duration=longest:dropout_transition=2:normalize=0,volume=0.5[aout]"
        );
    }

    #[test]
    fn test_transcoder_args_order() {
        let grid = GridLayout::compute(2, 1920, 1080).unwrap();
        let args = transcoder_args(Path::new("/tmp/r.sdp"), Path::new("/tmp/r.mp4"), 2, &grid);
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let input = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args.get(input + 1).map(String::as_str), Some("/tmp/r.sdp"));
        let filter = args.iter().position(|a| a == "-filter_complex").unwrap();
        assert!(filter > input);
        assert!(args
            .get(filter + 1)
            .is_some_and(|f| f.contains("[vout]; [0:1][0:3]amix")));
        assert_eq!(args.first().map(String::as_str), Some("-loglevel"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/r.mp4"));
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-movflags", "+faststart"]));
    }
}
