//! Playback render throughput
//!
//! One inline block of drift-compensated output, and the mono conversion
//! of a typical inbound PCM frame.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use sdr_audio_link::audio::buffer::PlaybackBuffer;
use sdr_audio_link::audio::playback::Renderer;
use sdr_audio_link::config::PlaybackConfig;
use sdr_audio_link::demux::{Demuxer, Frame};

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render");
    let config = PlaybackConfig::default();

    group.bench_function("buffer_render_4096", |b| {
        let mut buffer = PlaybackBuffer::from_config(&config);
        let input = vec![0.25f32; 4096];
        let mut out = vec![0.0f32; 4096];

        b.iter(|| {
            // Keep occupancy off target so the resampler steps fractionally
            buffer.write(black_box(&input));
            buffer.write(black_box(&input));
            buffer.render(black_box(&mut out));
            buffer.render(black_box(&mut out));
            black_box(&out);
        });
    });

    group.bench_function("renderer_stereo_512", |b| {
        let mut renderer = Renderer::new(&config, 0.8);
        let mut out = vec![0.0f32; 1024];

        b.iter(|| {
            renderer.apply(sdr_audio_link::audio::PlaybackCommand::Samples(vec![0.25; 512]));
            renderer.render_interleaved(black_box(&mut out), 2);
            black_box(&out);
        });
    });

    group.bench_function("demux_to_mono_2048", |b| {
        let mut demuxer = Demuxer::new();
        let frame = Bytes::from(vec![0x10u8; 8192]);

        b.iter(|| match demuxer.demux(black_box(frame.clone())) {
            Frame::Audio(audio) => black_box(audio.to_mono(2)),
            Frame::Spectrum(_) => Vec::new(),
        });
    });

    group.finish();
}

criterion_group!(benches, bench_render);
criterion_main!(benches);
