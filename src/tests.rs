#[cfg(test)]
mod tests {
    use crate::annotation::VisionBackend;
    use crate::config::{DispatchConfig, ExtractionConfig, MotionConfig};
    use crate::dispatch::{JsonEnvelopeCodec, LegacyLabelCodec, MessageCodec};
    use crate::extractor::{ClassificationExtractor, WeightExtractor, WeightParser};
    use crate::sampler::{DirectorySampler, PolledSampler, Sampler, SimulatedScale};
    use crate::{
        Dispatcher, MotionDetector, Pipeline, PollDetector, Sample, SamplerError,
        WebSocketTransport,
    };
    use futures_util::StreamExt;
    use image::{Rgb, RgbImage};
    use std::path::Path;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::runtime::Runtime;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::tungstenite::Message;

    const TWO_APPLES: &str = r#"{"responses":[{"localizedObjectAnnotations":[
        {"name":"Apple","score":0.95},
        {"name":"Apple","score":0.91},
        {"name":"Person","score":0.80}
    ]}]}"#;

    const APPLE_AND_BANANA: &str = r#"{"responses":[{"localizedObjectAnnotations":[
        {"name":"Apple","score":0.95},
        {"name":"Banana","score":0.91}
    ]}]}"#;

    /// Ends an endless sampler after a fixed number of samples.
    struct Limit<S> {
        inner: S,
        left: usize,
    }

    impl<S: Sampler> Sampler for Limit<S> {
        fn next_sample(&mut self) -> Result<Option<Sample>, SamplerError> {
            if self.left == 0 {
                return Ok(None);
            }
            self.left -= 1;
            self.inner.next_sample()
        }

        fn name(&self) -> &str {
            self.inner.name()
        }
    }

    /// Accepts one websocket client and collects its text messages until it closes.
    async fn spawn_consumer() -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let uri = format!("ws://{}", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            let mut received = Vec::new();
            while let Some(Ok(message)) = ws.next().await {
                match message {
                    Message::Text(text) => received.push(text),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            received
        });
        (uri, task)
    }

    /// Black, white, black: two changes after the baseline.
    fn write_frames(dir: &Path) {
        for (i, value) in [0u8, 255, 0].into_iter().enumerate() {
            RgbImage::from_pixel(32, 24, Rgb([value, value, value]))
                .save(dir.join(format!("frame_{i:03}.png")))
                .unwrap();
        }
    }

    fn motion_config() -> MotionConfig {
        MotionConfig {
            debounce_ms: 0,
            ..MotionConfig::default()
        }
    }

    fn run_vision_pipeline<C: MessageCodec + 'static>(
        annotate_body: &str,
        codec: C,
    ) -> Vec<String> {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1/images:annotate")
            .with_status(200)
            .with_body(annotate_body)
            .expect(2)
            .create();

        let frames = tempfile::tempdir().unwrap();
        write_frames(frames.path());

        let runtime = Runtime::new().unwrap();
        let (uri, consumer) = runtime.block_on(spawn_consumer());
        let (dispatcher, handle) = Dispatcher::new(
            WebSocketTransport::new(uri),
            codec,
            &DispatchConfig::default(),
        );
        let dispatcher_task = runtime.spawn(dispatcher.run());

        let backend = VisionBackend::with_endpoint(server.url());
        let extractor = ClassificationExtractor::new(Box::new(backend), &ExtractionConfig::default());
        let sampler = DirectorySampler::open(frames.path(), Duration::ZERO, None).unwrap();

        let report = Pipeline::new(
            sampler,
            MotionDetector::new(&motion_config()),
            extractor.into(),
            handle,
            runtime.handle().clone(),
            4,
        )
        .run()
        .unwrap();
        assert_eq!(report.samples, 3);
        assert_eq!(report.events, 2);
        assert_eq!(report.dropped, 0);

        runtime.block_on(dispatcher_task).unwrap();
        mock.assert();
        runtime.block_on(consumer).unwrap()
    }

    #[test]
    fn test_vision_pipeline_delivers_recognised_items() {
        let received = run_vision_pipeline(TWO_APPLES, JsonEnvelopeCodec);

        assert_eq!(received.len(), 2);
        for text in &received {
            assert_eq!(text, r#"{"tipo":"fruta","nombre":"manzana"}"#);
        }
    }

    #[test]
    fn test_vision_pipeline_legacy_consumer() {
        let received = run_vision_pipeline(TWO_APPLES, LegacyLabelCodec);

        assert_eq!(received, vec!["manzana", "manzana"]);
    }

    #[test]
    fn test_vision_pipeline_rejects_mixed_items() {
        // both frames are annotated, neither yields a message
        let received = run_vision_pipeline(APPLE_AND_BANANA, JsonEnvelopeCodec);
        assert!(received.is_empty());
    }

    #[test]
    fn test_scale_pipeline_delivers_weights() {
        let runtime = Runtime::new().unwrap();
        let (uri, consumer) = runtime.block_on(spawn_consumer());
        let (dispatcher, handle) = Dispatcher::new(
            WebSocketTransport::new(uri),
            JsonEnvelopeCodec,
            &DispatchConfig::default(),
        );
        let dispatcher_task = runtime.spawn(dispatcher.run());

        let device = SimulatedScale::with_seed(42).with_noise_ratio(0.0);
        let sampler = Limit {
            inner: PolledSampler::new(device, 0x05, Duration::ZERO, Duration::ZERO),
            left: 5,
        };
        let parser = WeightParser::default();

        let report = Pipeline::new(
            sampler,
            PollDetector::new(parser),
            WeightExtractor::new(parser).into(),
            handle,
            runtime.handle().clone(),
            8,
        )
        .run()
        .unwrap();
        assert_eq!(report.events, 5);

        let delivery = runtime.block_on(dispatcher_task).unwrap();
        assert_eq!(delivery.delivered, 5);

        let received = runtime.block_on(consumer).unwrap();
        assert_eq!(received.len(), 5);
        for text in received {
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value["tipo"], "peso");
            assert!(value["valor"].as_u64().unwrap() < 5_100);
            assert!(value["timestamp"].as_str().unwrap().contains('T'));
        }
    }
}
