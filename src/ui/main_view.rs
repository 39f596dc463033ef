use super::render_util::frame_to_image;
use super::{
    ActiveTheme, AnyElement, AppView, Arc, Button, ButtonVariants, CANVAS_MIN_SIZE, Context,
    DEFAULT_CANVAS_RATIO, Hsla, IntoElement, ObjectFit, ParentElement, PoseState, RenderImage,
    SessionStatus, SharedString, Slider, Styled, StyledExt, StyledImage, Tag, Window, div, h_flex,
    img, px, v_flex,
};

const WAITING_FOR_CAMERA: &str = "正在等待摄像头权限...";

impl AppView {
    pub(super) fn render_main(
        &mut self,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        self.drain_session_frames(window, cx);

        let status = self.session.status();
        let block_size = self.session.block_size();

        let ratio = self.canvas_aspect_ratio();
        let canvas_width = CANVAS_MIN_SIZE.0.max(CANVAS_MIN_SIZE.1 * ratio);
        let canvas_height = canvas_width / ratio;

        let mosaic_view = match (&self.mosaic_image, &status) {
            (Some(image), SessionStatus::Running) => canvas_image(image.clone()),
            _ => self.render_waiting(&status),
        };
        let overlay_view = match &self.overlay_image {
            Some(image) => canvas_image(image.clone()),
            None => div().size_full().into_any_element(),
        };

        let canvases = h_flex()
            .gap_3()
            .items_start()
            .child(canvas_shell(canvas_width, canvas_height, mosaic_view))
            .child(canvas_shell(canvas_width, canvas_height, overlay_view));

        let controls = h_flex()
            .gap_3()
            .items_center()
            .child(
                Button::new(SharedString::from("block-size-decrease"))
                    .outline()
                    .label("−")
                    .on_click(cx.listener(|this, _, window, cx| {
                        this.step_block_size(-1, window, cx)
                    })),
            )
            .child(Slider::new(&self.block_slider).horizontal().w(px(240.0)))
            .child(
                Button::new(SharedString::from("block-size-increase"))
                    .outline()
                    .label("+")
                    .on_click(cx.listener(|this, _, window, cx| {
                        this.step_block_size(1, window, cx)
                    })),
            )
            .child(
                div()
                    .min_w(px(140.0))
                    .text_sm()
                    .font_semibold()
                    .text_color(gpui::rgb(0xe2e8f0))
                    .child(format!("马赛克密度: {block_size}px")),
            );

        v_flex()
            .size_full()
            .gap_4()
            .p_4()
            .bg(gpui::rgb(0x1a2332))
            .child(self.render_status_row(&status, cx))
            .child(canvases)
            .child(controls)
            .into_any_element()
    }

    fn drain_session_frames(&mut self, window: &mut Window, cx: &mut Context<'_, Self>) {
        if let Some(frame) = self.session.canvas().take() {
            self.frame_size = Some((frame.width, frame.height));
            if let Some(image) = frame_to_image(&frame) {
                replace_image(&mut self.mosaic_image, image, window, cx);
            }
        }
        if let Some(frame) = self.session.overlay().take() {
            if let Some(image) = frame_to_image(&frame) {
                replace_image(&mut self.overlay_image, image, window, cx);
            }
        }
    }

    fn render_waiting(&self, status: &SessionStatus) -> AnyElement {
        let mut content = v_flex().gap_2().items_center().child(
            div()
                .text_sm()
                .text_color(gpui::rgb(0x8b95a5))
                .child(WAITING_FOR_CAMERA),
        );
        if let SessionStatus::DeviceUnavailable(message) = status {
            content = content.child(Tag::danger().rounded_full().child(message.clone()));
        }

        div()
            .size_full()
            .flex()
            .items_center()
            .justify_center()
            .child(content)
            .into_any_element()
    }

    fn render_status_row(&self, status: &SessionStatus, cx: &Context<'_, Self>) -> AnyElement {
        let theme = cx.theme();
        let (camera_icon, camera_text, camera_color): (&str, &str, Hsla) = match status {
            SessionStatus::Running => ("●", "摄像头就绪", theme.success),
            SessionStatus::Waiting => ("○", "等待摄像头", theme.muted_foreground),
            SessionStatus::DeviceUnavailable(_) => ("○", "摄像头不可用", theme.danger),
        };

        let pose_tag = match (self.session.pose_state(), self.session.model_download()) {
            (PoseState::Loading, Some(progress)) => {
                Tag::secondary().child(format!("姿态模型下载中 {}", format_download(progress)))
            }
            (PoseState::Loading, None) => Tag::secondary().child("姿态模型加载中"),
            (PoseState::Ready, _) => Tag::success().child("姿态识别运行中"),
            (PoseState::Failed, _) => Tag::warning().child("姿态识别不可用"),
        };

        h_flex()
            .gap_3()
            .items_center()
            .child(
                div()
                    .px_2()
                    .py_0p5()
                    .rounded_md()
                    .bg(gpui::rgba(0x00000033))
                    .text_xs()
                    .text_color(camera_color)
                    .child(format!("{camera_icon} {camera_text}")),
            )
            .child(pose_tag.rounded_full())
            .into_any_element()
    }

    fn canvas_aspect_ratio(&self) -> f32 {
        match self.frame_size {
            Some((width, height)) if height > 0 => width as f32 / height as f32,
            _ => DEFAULT_CANVAS_RATIO,
        }
    }
}

fn format_download((downloaded, total): (u64, Option<u64>)) -> String {
    match total {
        Some(total) if total > 0 => format!("{}%", downloaded.saturating_mul(100) / total),
        _ => format!("{:.1} MB", downloaded as f64 / (1024.0 * 1024.0)),
    }
}

fn canvas_image(image: Arc<RenderImage>) -> AnyElement {
    img(image)
        .size_full()
        .object_fit(ObjectFit::Contain)
        .into_any_element()
}

fn canvas_shell(width: f32, height: f32, content: AnyElement) -> AnyElement {
    div()
        .w(px(width))
        .h(px(height))
        .overflow_hidden()
        .rounded_lg()
        .bg(gpui::rgb(0x0f1419))
        .child(content)
        .into_any_element()
}

fn replace_image(
    slot: &mut Option<Arc<RenderImage>>,
    new_image: Arc<RenderImage>,
    window: &mut Window,
    cx: &mut Context<'_, AppView>,
) {
    if let Some(old_image) = slot.replace(new_image) {
        // Explicitly drop the previous GPU texture; otherwise the sprite atlas keeps
        // every frame and memory will climb rapidly while the camera is running.
        cx.drop_image(old_image, Some(window));
    }
}
