use candle_core::{Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use yomu_core::{CtcLoss, CtcTargets, GreedyDecoder, Vocabulary};

fn bench_ctc(c: &mut Criterion) {
    let device = Device::Cpu;
    let vocab = Vocabulary::from_labels(["2345678bcdefgmnpwxy"]);
    let classes = vocab.num_classes();
    let (batch, steps) = (16, 50);

    let log_probs = Tensor::full(-(classes as f32).ln(), (batch, steps, classes), &device).unwrap();
    let codes: Vec<u32> = (0..batch * 5).map(|i| (i % vocab.len()) as u32).collect();
    let labels = Tensor::from_vec(codes, (batch, 5), &device).unwrap();
    let lengths = vec![5usize; batch];

    let decoder = GreedyDecoder::new(vocab.clone()).with_max_length(5);
    c.bench_function("greedy_decode_batch_16", |b| {
        b.iter(|| decoder.decode_batch(black_box(&log_probs)).unwrap());
    });

    let loss = CtcLoss::new(vocab.blank());
    c.bench_function("ctc_loss_batch_16", |b| {
        b.iter(|| {
            loss.mean(
                black_box(&log_probs),
                CtcTargets {
                    labels: &labels,
                    lengths: &lengths,
                },
            )
            .unwrap()
        });
    });
}

criterion_group!(benches, bench_ctc);
criterion_main!(benches);
