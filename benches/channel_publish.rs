/// Benchmarks for the multiplexer hot paths: fan-out of parsed messages to channel
/// subjects, and subscription bookkeeping under symbol churn.
use async_trait::async_trait;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use market_ws::Result;
use market_ws::channel::{
    ChannelOp, Connector, Multiplexer, MultiplexerConfig, Publisher, Subscription,
};
use market_ws::ws::ConnectionManager;
use serde_json::{Value, json};
use url::Url;

struct NoopConnector;

#[async_trait]
impl Connector for NoopConnector {
    type Message = Value;

    async fn address(&self) -> Result<Url> {
        Ok(Url::parse("ws://127.0.0.1:9/ws")?)
    }

    fn operate_ws_channel(
        &self,
        _op: ChannelOp,
        _subscriptions: &[Subscription],
        _connection: &ConnectionManager,
    ) -> Result<()> {
        Ok(())
    }

    fn on_message_obj(&self, _message: Value, _publisher: &Publisher<'_, Value>) -> Result<()> {
        Ok(())
    }
}

fn client() -> Multiplexer<NoopConnector> {
    Multiplexer::new(
        NoopConnector,
        MultiplexerConfig::builder()
            .auto_start_on_subscription(false)
            .build(),
    )
}

fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel/publish");
    group.throughput(Throughput::Elements(1));

    let trade = json!({ "symbol": "BTC/USDT", "price": "65000.5", "size": "0.01" });

    for consumers in [0_usize, 1, 8, 64] {
        let client = client();
        let streams: Vec<_> = (0..consumers).map(|_| client.subject("trade")).collect();

        group.bench_with_input(
            BenchmarkId::new("fan_out", consumers),
            &consumers,
            |b, _| {
                b.iter(|| {
                    std::hint::black_box(
                        client.publish_message("trade", std::hint::black_box(trade.clone())),
                    )
                });
            },
        );
        drop(streams);
    }

    group.finish();
}

fn bench_subscription_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel/subscriptions");

    let symbols: Vec<String> = (0..200).map(|n| format!("SYM{n}/USDT")).collect();
    group.throughput(Throughput::Elements(symbols.len() as u64));

    group.bench_function("add_remove_symbols", |b| {
        let client = client();
        b.iter(|| {
            client.add_symbols("trade", symbols.iter().cloned());
            std::hint::black_box(client.running_symbols("trade"));
            client.remove_symbols("trade", symbols.iter().cloned());
        });
    });

    group.bench_function("status_snapshot", |b| {
        let client = client();
        client.add_symbols("trade", symbols.iter().cloned());
        client.add_symbols("kline", symbols.iter().cloned());
        b.iter(|| std::hint::black_box(client.ws_status_snapshot()));
    });

    group.finish();
}

criterion_group!(benches, bench_publish, bench_subscription_churn);
criterion_main!(benches);
