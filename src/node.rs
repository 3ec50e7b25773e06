// node.rs — The image equalizer node.
//
// Two layers:
//
//   EqualizeNode — the processing core: one frame in, one Mono8 frame out.
//                  Holds the configuration snapshot, the lazily created
//                  CLAHE processor, the optional GPU backend and the
//                  optional debug view. Single-threaded: frame callbacks
//                  and reconfiguration are serialized by the caller.
//
//   NodeHost     — wires the core to the bus: lazy subscription driven by
//                  output listeners, serial frame pump, per-frame error
//                  logging. Processing failures drop the frame and the
//                  host keeps serving.

use std::sync::Arc;

use log::{debug, error, warn};

use crate::bus::{Subscriber, Topic};
use crate::config::{EqualizeConfig, EqualizeMethod, NodeParams};
use crate::convert;
use crate::error::Result;
use crate::frame::{CameraInfo, Frame, Header};
use crate::gpu::GpuEqualizer;
use crate::histeq::{self, Clahe};
use crate::viewer::DebugView;

/// The processing core of the equalizer node.
pub struct EqualizeNode {
    params: NodeParams,
    /// Immutable configuration snapshot, replaced wholesale on
    /// reconfigure. A frame in flight keeps the snapshot it started with.
    config: Arc<EqualizeConfig>,
    /// Created on first use of the CLAHE variant, then reused for every
    /// frame until teardown.
    clahe: Option<Clahe>,
    gpu: Option<GpuEqualizer>,
    viewer: Option<DebugView>,
}

impl EqualizeNode {
    /// Initialize the node. When `params.use_gpu` is set, the GPU backend
    /// is brought up here; failure degrades to the CPU path with a
    /// warning rather than failing construction.
    pub fn new(params: NodeParams) -> Self {
        let gpu = if params.use_gpu {
            match GpuEqualizer::new() {
                Ok(eq) => {
                    debug!("gpu backend active on {}", eq.adapter_name());
                    Some(eq)
                }
                Err(e) => {
                    warn!("gpu backend unavailable ({e}); using cpu path");
                    None
                }
            }
        } else {
            None
        };

        let viewer = params.debug_view.then(DebugView::new);

        EqualizeNode {
            params,
            config: Arc::new(EqualizeConfig::default()),
            clahe: None,
            gpu,
            viewer,
        }
    }

    /// Construct with an explicit initial configuration.
    pub fn with_config(params: NodeParams, config: EqualizeConfig) -> Result<Self> {
        config.validate()?;
        let mut node = Self::new(params);
        node.config = Arc::new(config);
        Ok(node)
    }

    pub fn params(&self) -> &NodeParams {
        &self.params
    }

    /// The current configuration snapshot.
    pub fn config(&self) -> Arc<EqualizeConfig> {
        Arc::clone(&self.config)
    }

    /// Atomically install a new configuration. Validation failure leaves
    /// the previous snapshot in effect; there are no partial updates.
    pub fn reconfigure(&mut self, config: EqualizeConfig) -> Result<()> {
        config.validate()?;
        self.config = Arc::new(config);
        debug!("configuration updated: {:?}", self.config);
        Ok(())
    }

    /// Whether the GPU backend is active.
    pub fn gpu_active(&self) -> bool {
        self.gpu.is_some()
    }

    /// Process one frame, taking the outbound frame id from the image's
    /// own header.
    pub fn process(&mut self, frame: &Frame) -> Result<Frame> {
        let frame_id = frame.header.frame_id.clone();
        self.equalize(frame, frame_id)
    }

    /// Process one frame of a synchronized image + calibration pair,
    /// taking the outbound frame id from the calibration message.
    pub fn process_with_info(&mut self, frame: &Frame, info: &CameraInfo) -> Result<Frame> {
        self.equalize(frame, info.header.frame_id.clone())
    }

    /// The per-frame pipeline: grayscale conversion → algorithm dispatch
    /// → optional debug render → envelope rewrite.
    fn equalize(&mut self, frame: &Frame, frame_id: String) -> Result<Frame> {
        let config = Arc::clone(&self.config);

        let gray = convert::luma(frame)?;

        let out = match config.histogram_equalization_type {
            EqualizeMethod::Clahe => {
                if let Some(gpu) = &self.gpu {
                    gpu.equalize_clahe(
                        &gray,
                        config.clahe_tile_size_x,
                        config.clahe_tile_size_y,
                        config.clahe_clip_limit,
                    )?
                } else {
                    let clahe = self.clahe.get_or_insert_with(Clahe::new);
                    // Re-applied every frame; cheap and idempotent.
                    clahe.set_tile_grid(config.clahe_tile_size_x, config.clahe_tile_size_y);
                    clahe.set_clip_limit(config.clahe_clip_limit);
                    clahe.apply(&gray)
                }
            }
            EqualizeMethod::Global => {
                if let Some(gpu) = &self.gpu {
                    gpu.equalize_histogram(&gray)?
                } else {
                    histeq::equalize_histogram(&gray)
                }
            }
        };

        // Observational only; never touches the published output.
        if let Some(viewer) = &mut self.viewer {
            viewer.show(&out);
        }

        // Preserve the inbound stamp and sequence number; only the frame
        // id is overridden.
        let header = Header {
            seq: frame.header.seq,
            stamp: frame.header.stamp,
            frame_id,
        };
        Ok(convert::mono8_frame(header, &out))
    }
}

/// A synchronized image + calibration message pair, as delivered by the
/// camera-info subscription.
pub type SyncedFrame = (Frame, CameraInfo);

/// Hosts an [`EqualizeNode`] on the bus.
pub struct NodeHost {
    node: EqualizeNode,
    image_in: Topic<Frame>,
    synced_in: Topic<SyncedFrame>,
    image_out: Topic<Frame>,
    // Inbound subscription handles. At most one is active, but teardown
    // releases both unconditionally, so releasing is idempotent even if
    // the configuration changed in between.
    image_sub: Option<Subscriber<Frame>>,
    synced_sub: Option<Subscriber<SyncedFrame>>,
}

impl NodeHost {
    pub fn new(
        node: EqualizeNode,
        image_in: Topic<Frame>,
        synced_in: Topic<SyncedFrame>,
        image_out: Topic<Frame>,
    ) -> Self {
        NodeHost {
            node,
            image_in,
            synced_in,
            image_out,
            image_sub: None,
            synced_sub: None,
        }
    }

    pub fn node(&self) -> &EqualizeNode {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut EqualizeNode {
        &mut self.node
    }

    pub fn output(&self) -> &Topic<Frame> {
        &self.image_out
    }

    /// Whether the host currently holds an inbound subscription.
    pub fn is_subscribed(&self) -> bool {
        self.image_sub.is_some() || self.synced_sub.is_some()
    }

    /// Notification that a listener appeared on the output topic.
    pub fn on_subscriber_added(&mut self) {
        self.sync_subscription();
    }

    /// Notification that a listener left the output topic.
    pub fn on_subscriber_removed(&mut self) {
        self.sync_subscription();
    }

    /// Align the inbound subscription with the output listener count:
    /// subscribe on the first listener, release on the last departure.
    fn sync_subscription(&mut self) {
        let wanted = self.image_out.subscriber_count() > 0;
        match (wanted, self.is_subscribed()) {
            (true, false) => self.subscribe(),
            (false, true) => self.unsubscribe(),
            _ => {}
        }
    }

    fn subscribe(&mut self) {
        let queue_size = self.node.params().queue_size;
        if self.node.config().use_camera_info {
            debug!("subscribing to synchronized image + camera-info stream");
            self.synced_sub = Some(self.synced_in.subscribe(queue_size));
        } else {
            debug!("subscribing to image stream");
            self.image_sub = Some(self.image_in.subscribe(queue_size));
        }
    }

    fn unsubscribe(&mut self) {
        debug!("unsubscribing from image streams");
        self.image_sub = None;
        self.synced_sub = None;
    }

    /// Drain pending inbound frames, processing each to completion.
    /// A failed frame is logged and dropped; the host keeps serving.
    /// Returns the number of frames published.
    pub fn spin_once(&mut self) -> usize {
        self.sync_subscription();

        let mut published = 0;

        if let Some(sub) = &self.image_sub {
            for frame in sub.drain() {
                match self.node.process(&frame) {
                    Ok(out) => {
                        self.image_out.publish(&out);
                        published += 1;
                    }
                    Err(e) => {
                        error!("image processing error: {} ({})", e, e.operation());
                    }
                }
            }
        }

        if let Some(sub) = &self.synced_sub {
            for (frame, info) in sub.drain() {
                match self.node.process_with_info(&frame, &info) {
                    Ok(out) => {
                        self.image_out.publish(&out);
                        published += 1;
                    }
                    Err(e) => {
                        error!("image processing error: {} ({})", e, e.operation());
                    }
                }
            }
        }

        published
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Encoding, Stamp};

    fn cpu_params() -> NodeParams {
        NodeParams {
            use_gpu: false,
            ..Default::default()
        }
    }

    fn bgr_frame(seq: u64, frame_id: &str) -> Frame {
        // 4×2 BGR gradient.
        let mut data = Vec::new();
        for i in 0..8u8 {
            data.extend_from_slice(&[i * 30, i * 20, i * 10]);
        }
        Frame::from_raw(
            Header::new(seq, Stamp::new(100, 7), frame_id),
            Encoding::Bgr8,
            4,
            2,
            data,
        )
        .unwrap()
    }

    #[test]
    fn test_output_is_mono8() {
        let mut node = EqualizeNode::new(cpu_params());
        let out = node.process(&bgr_frame(1, "cam0")).unwrap();
        assert_eq!(out.encoding, Encoding::Mono8);
        assert_eq!(out.width, 4);
        assert_eq!(out.height, 2);
        assert_eq!(out.data.len(), 8);
    }

    #[test]
    fn test_envelope_preserved_frame_id_from_image() {
        let mut node = EqualizeNode::new(cpu_params());
        let out = node.process(&bgr_frame(42, "camera_optical")).unwrap();
        assert_eq!(out.header.seq, 42);
        assert_eq!(out.header.stamp, Stamp::new(100, 7));
        assert_eq!(out.header.frame_id, "camera_optical");
    }

    #[test]
    fn test_frame_id_from_camera_info() {
        let mut node = EqualizeNode::new(cpu_params());
        let frame = bgr_frame(3, "image_frame");
        let info = CameraInfo::from_pinhole(
            Header::new(3, Stamp::new(100, 7), "calibrated_frame"),
            4,
            2,
            500.0,
            500.0,
            2.0,
            1.0,
        );
        let out = node.process_with_info(&frame, &info).unwrap();
        // The calibration message's id wins even when the ids differ.
        assert_eq!(out.header.frame_id, "calibrated_frame");
        assert_eq!(out.header.seq, 3);
    }

    #[test]
    fn test_reconfigure_switches_method_without_restart() {
        let mut node = EqualizeNode::new(cpu_params());
        let frame = bgr_frame(1, "cam0");

        let global_out = node.process(&frame).unwrap();

        node.reconfigure(EqualizeConfig {
            histogram_equalization_type: EqualizeMethod::Clahe,
            clahe_tile_size_x: 2,
            clahe_tile_size_y: 2,
            ..Default::default()
        })
        .unwrap();
        let clahe_out = node.process(&frame).unwrap();

        assert_ne!(
            global_out.data, clahe_out.data,
            "method switch should change the output"
        );
    }

    #[test]
    fn test_reconfigure_rejects_invalid_and_keeps_previous() {
        let mut node = EqualizeNode::new(cpu_params());
        let before = node.config();
        let err = node.reconfigure(EqualizeConfig {
            clahe_tile_size_x: 0,
            ..Default::default()
        });
        assert!(err.is_err());
        assert_eq!(*node.config(), *before);
    }

    #[test]
    fn test_unsupported_encoding_is_an_error() {
        let mut node = EqualizeNode::new(cpu_params());
        let frame = Frame::from_raw(
            Header::new(1, Stamp::default(), "cam0"),
            Encoding::Mono16,
            2,
            2,
            vec![0u8; 8],
        )
        .unwrap();
        assert!(node.process(&frame).is_err());
    }

    #[test]
    fn test_grayscale_input_passes_through_conversion() {
        // Mono8 input: the algorithm sees exactly the input pixels.
        let mut node = EqualizeNode::new(cpu_params());
        let gray = crate::image::Image::from_vec(2, 2, vec![0u8, 64, 128, 255]);
        let frame = Frame::from_gray(Header::new(1, Stamp::default(), "cam0"), &gray);
        let out = node.process(&frame).unwrap();
        // Matches the global-equalization reference for this image.
        assert_eq!(out.data, vec![0, 85, 170, 255]);
    }

    fn make_host(config: EqualizeConfig) -> NodeHost {
        let node = EqualizeNode::with_config(cpu_params(), config).unwrap();
        NodeHost::new(
            node,
            Topic::new("image"),
            Topic::new("image_synced"),
            Topic::new("image_out"),
        )
    }

    #[test]
    fn test_host_subscribes_only_with_listeners() {
        let mut host = make_host(EqualizeConfig::default());
        assert!(!host.is_subscribed());

        host.on_subscriber_added();
        // No listener actually appeared, so still unsubscribed.
        assert!(!host.is_subscribed());

        let listener = host.output().subscribe(4);
        host.on_subscriber_added();
        assert!(host.is_subscribed());

        drop(listener);
        host.on_subscriber_removed();
        assert!(!host.is_subscribed());
    }

    #[test]
    fn test_host_pumps_frames_to_listener() {
        let mut host = make_host(EqualizeConfig::default());
        let image_in = host.image_in.clone();

        let listener = host.output().subscribe(4);
        host.on_subscriber_added();

        image_in.publish(&bgr_frame(1, "cam0"));
        image_in.publish(&bgr_frame(2, "cam0"));
        assert_eq!(host.spin_once(), 2);

        let received = listener.drain();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].header.seq, 1);
        assert_eq!(received[1].header.seq, 2);
        assert!(received.iter().all(|f| f.encoding == Encoding::Mono8));
    }

    #[test]
    fn test_host_drops_bad_frames_and_continues() {
        let mut host = make_host(EqualizeConfig::default());
        let image_in = host.image_in.clone();

        let listener = host.output().subscribe(8);
        host.on_subscriber_added();

        let bad = Frame::from_raw(
            Header::new(1, Stamp::default(), "cam0"),
            Encoding::Bgra8,
            2,
            2,
            vec![0u8; 16],
        )
        .unwrap();
        image_in.publish(&bad);
        image_in.publish(&bgr_frame(2, "cam0"));

        // The malformed frame is dropped; the good one still flows.
        assert_eq!(host.spin_once(), 1);
        let received = listener.drain();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].header.seq, 2);
    }

    #[test]
    fn test_host_camera_info_stream() {
        let config = EqualizeConfig {
            use_camera_info: true,
            ..Default::default()
        };
        let mut host = make_host(config);
        let synced_in = host.synced_in.clone();

        let listener = host.output().subscribe(4);
        host.on_subscriber_added();

        let frame = bgr_frame(9, "raw_frame");
        let info = CameraInfo::from_pinhole(
            Header::new(9, Stamp::default(), "rectified_frame"),
            4,
            2,
            500.0,
            500.0,
            2.0,
            1.0,
        );
        synced_in.publish(&(frame, info));
        assert_eq!(host.spin_once(), 1);

        let received = listener.drain();
        assert_eq!(received[0].header.frame_id, "rectified_frame");
    }

    #[test]
    fn test_host_queue_depth_bounds_backlog() {
        let node = EqualizeNode::with_config(
            NodeParams {
                queue_size: 2,
                use_gpu: false,
                ..Default::default()
            },
            EqualizeConfig::default(),
        )
        .unwrap();
        let mut host = NodeHost::new(
            node,
            Topic::new("image"),
            Topic::new("image_synced"),
            Topic::new("image_out"),
        );
        let image_in = host.image_in.clone();

        let listener = host.output().subscribe(8);
        host.on_subscriber_added();

        for seq in 0..5 {
            image_in.publish(&bgr_frame(seq, "cam0"));
        }
        // Queue depth 2: only the first two survive the backlog.
        assert_eq!(host.spin_once(), 2);
        let received = listener.drain();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].header.seq, 0);
        assert_eq!(received[1].header.seq, 1);
    }
}
