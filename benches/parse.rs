use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ircline::IrcMessage;

fn read_input() -> Vec<String> {
  include_str!("data.txt")
    .lines()
    .cycle()
    .take(1000)
    .map(String::from)
    .collect::<Vec<_>>()
}

fn parse(c: &mut Criterion) {
  let input = read_input();
  let bytes = input.iter().map(|line| line.len() as u64).sum();

  let mut group = c.benchmark_group("parse");
  group.throughput(Throughput::Bytes(bytes));
  group.bench_with_input(BenchmarkId::new("ircline", "data.txt"), &input, |b, lines| {
    b.iter_with_setup(
      || lines.clone(),
      |lines| {
        for line in lines {
          black_box(IrcMessage::parse(line).expect("failed to parse"));
        }
      },
    );
  });
  group.bench_with_input(
    BenchmarkId::new("ircline", "data.txt (FromStr)"),
    &input,
    |b, lines| {
      b.iter(|| {
        for line in lines {
          black_box(line.parse::<IrcMessage>().expect("failed to parse"));
        }
      });
    },
  );
  group.finish();
}

criterion_group!(benches, parse);
criterion_main!(benches);
