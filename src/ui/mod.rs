use std::sync::Arc;

use gpui::{
    AnyElement, App, AppContext, Context, Entity, Hsla, IntoElement, ObjectFit, ParentElement,
    Render, RenderImage, SharedString, Styled, StyledImage, Subscription, TitlebarOptions, Window,
    WindowOptions, div, img, px,
};
use gpui_component::{
    ActiveTheme, Root, StyledExt,
    button::{Button, ButtonVariants},
    h_flex,
    slider::{Slider, SliderEvent, SliderState},
    tag::Tag,
    v_flex,
};
use image::{Frame as ImageFrame, ImageBuffer, Rgba};

use crate::{
    pipeline::{MosaicSession, PoseState, SessionStatus},
    types::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE},
};

mod main_view;
mod render_util;

const CANVAS_MIN_SIZE: (f32, f32) = (320.0, 240.0);
const DEFAULT_CANVAS_RATIO: f32 = 4.0 / 3.0;

pub fn launch_ui(app: &mut App, session: MosaicSession) -> gpui::Result<()> {
    let window_options = WindowOptions {
        titlebar: Some(TitlebarOptions {
            title: Some("Pose Mosaic".into()),
            ..Default::default()
        }),
        ..Default::default()
    };

    app.open_window(window_options, move |window, app| {
        let view = app.new(|cx| AppView::new(session, window, cx));
        app.new(|cx| Root::new(view, window, cx))
    })?;

    Ok(())
}

struct AppView {
    session: MosaicSession,
    block_slider: Entity<SliderState>,
    mosaic_image: Option<Arc<RenderImage>>,
    overlay_image: Option<Arc<RenderImage>>,
    frame_size: Option<(u32, u32)>,
    _subscriptions: Vec<Subscription>,
}

impl AppView {
    fn new(mut session: MosaicSession, window: &mut Window, cx: &mut Context<'_, Self>) -> Self {
        // Failure is kept in the session status and shown in the window.
        let _ = session.start();

        let initial = session.block_size();
        let block_slider = cx.new(|_| block_size_slider(initial));
        let slider_subscription = cx.subscribe_in(
            &block_slider,
            window,
            |this, _, event: &SliderEvent, _, cx| match event {
                SliderEvent::Change(value) => {
                    this.apply_block_size(slider_block_size(value.end()), cx);
                }
            },
        );

        Self {
            session,
            block_slider,
            mosaic_image: None,
            overlay_image: None,
            frame_size: None,
            _subscriptions: vec![slider_subscription],
        }
    }

    fn apply_block_size(&mut self, value: u32, cx: &mut Context<'_, Self>) -> u32 {
        let applied = self.session.set_block_size(value);
        log::debug!("block size set to {applied}px");
        cx.notify();
        applied
    }

    /// Single-pixel adjustment from the −/+ buttons; keeps the slider in sync.
    fn step_block_size(&mut self, delta: i32, window: &mut Window, cx: &mut Context<'_, Self>) {
        let target = self.session.block_size().saturating_add_signed(delta);
        let applied = self.apply_block_size(target, cx);
        self.block_slider.update(cx, |slider, cx| {
            slider.set_value(applied as f32, window, cx);
        });
    }
}

/// One-pixel steps over the accepted block sizes.
fn block_size_slider(initial: u32) -> SliderState {
    SliderState::new()
        .min(MIN_BLOCK_SIZE as f32)
        .max(MAX_BLOCK_SIZE as f32)
        .step(1.0)
        .default_value(initial as f32)
}

fn slider_block_size(value: f32) -> u32 {
    value
        .round()
        .clamp(MIN_BLOCK_SIZE as f32, MAX_BLOCK_SIZE as f32) as u32
}

impl Render for AppView {
    fn render(
        &mut self,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> impl gpui::IntoElement {
        cx.defer_in(window, |_, _, cx| {
            cx.notify();
        });

        self.render_main(window, cx)
    }
}
