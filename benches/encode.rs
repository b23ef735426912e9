use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use mjpeg_player::capture::DecodedFrame;
use mjpeg_player::encode::codec::{EncoderParams, FrameEncoder, FrameScaler};
use mjpeg_player::encode::{
    CodecDescriptor, CodecId, CodecLibrary, JpegConfig, JpegLibrary, PixelFormat, Rational,
};

fn bench_transcode_1080p(c: &mut Criterion) {
    let width = 1920;
    let height = 1080;
    let frame = DecodedFrame::new(
        1,
        width,
        height,
        PixelFormat::Rgb24,
        Bytes::from(vec![128u8; (width * height * 3) as usize]),
    );

    let library = JpegLibrary::new(JpegConfig { quality: 80 });
    let source = CodecDescriptor::new(width, height, PixelFormat::Rgb24, Rational::per_frame(30));
    let target = source.target();
    let info = library.find_encoder(CodecId::Mjpeg).expect("encoder");
    let params = EncoderParams::for_encoder(&info, target);
    let mut encoder = library.open_encoder(&info, &params).expect("open encoder");
    let mut scaler = library.new_scaler(&source, &target).expect("scaler");
    let mut dst = library.alloc_frame(&target).expect("frame");

    c.bench_function("scale_and_encode_1080p_frame", |b| {
        b.iter(|| {
            scaler.scale(&frame, &mut dst).expect("scale frame");
            let _ = encoder.encode(&dst).expect("encode frame");
        })
    });
}

criterion_group!(benches, bench_transcode_1080p);
criterion_main!(benches);
