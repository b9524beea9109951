// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 输入、分析与输出的任务驱动
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  sync::Mutex,
  thread,
  time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{error, info, warn};

use crate::{
  frame::ImageFrame,
  output::Render,
  service::{CancelToken, FrameAnalyzer},
};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 只处理第一张图像
pub struct OneShotTask;

impl<
  D,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = ImageFrame>,
  M: FrameAnalyzer<Output = D>,
  O: Render<ImageFrame, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("读取图像 {} 成功，开始分析...", frame.name());
    let now = Instant::now();
    let result = model.analyze_frame(&frame, &CancelToken::default())?;
    let elapsed = now.elapsed();
    info!("分析完成，耗时: {:.2?}", elapsed);
    output.render_result(&frame, &result)?;
    info!("输出完成，总耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
  pub succeeded: usize,
  pub failed: usize,
  pub cancelled: usize,
}

/// 多线程处理全部输入，单张图像失败不影响其他图像
#[derive(Debug, Clone)]
pub struct BatchTask {
  workers: usize,
  limit: Option<usize>,
  cancel: CancelToken,
  handle_ctrlc: bool,
}

impl Default for BatchTask {
  fn default() -> Self {
    Self {
      workers: 1,
      limit: None,
      cancel: CancelToken::default(),
      handle_ctrlc: false,
    }
  }
}

impl BatchTask {
  pub fn with_workers(mut self, workers: usize) -> Self {
    self.workers = workers.max(1);
    self
  }

  pub fn with_limit(mut self, limit: Option<usize>) -> Self {
    self.limit = limit;
    self
  }

  pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  /// 收到 Ctrl-C 时取消剩余图像，30 秒后仍未退出则强制退出
  pub fn with_ctrlc(mut self, handle: bool) -> Self {
    self.handle_ctrlc = handle;
    self
  }

  pub fn cancel_token(&self) -> &CancelToken {
    &self.cancel
  }

  fn install_ctrlc(&self) -> anyhow::Result<()> {
    let cancel = self.cancel.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      cancel.cancel();
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
    .context("设置 Ctrl-C 处理失败")
  }

  pub fn run_batch<I, M, O>(&self, input: I, model: &M, output: &O) -> anyhow::Result<BatchSummary>
  where
    I: Iterator<Item = ImageFrame> + Send,
    M: FrameAnalyzer + Sync,
    O: Render<ImageFrame, M::Output> + Sync,
    O::Error: std::fmt::Display,
  {
    if self.handle_ctrlc {
      self.install_ctrlc()?;
    }

    info!("开始批量任务，{} 个工作线程", self.workers);
    let start = Instant::now();
    let limit = self.limit.unwrap_or(usize::MAX);
    let input = Mutex::new(input.take(limit));
    let summary = Mutex::new(BatchSummary::default());
    let cancel = &self.cancel;

    thread::scope(|scope| {
      for worker in 0..self.workers {
        let input = &input;
        let summary = &summary;
        scope.spawn(move || {
          loop {
            if cancel.is_cancelled() {
              break;
            }
            let next = input
              .lock()
              .unwrap_or_else(|poisoned| poisoned.into_inner())
              .next();
            let Some(frame) = next else {
              break;
            };

            let outcome = match model.analyze_frame(&frame, cancel) {
              Ok(result) => match output.render_result(&frame, &result) {
                Ok(()) => Ok(()),
                Err(err) => Err(format!("输出失败: {}", err)),
              },
              Err(_) if cancel.is_cancelled() => {
                warn!("[{}] {} 已取消", worker, frame.name());
                let mut stats = summary.lock().unwrap_or_else(|p| p.into_inner());
                stats.cancelled += 1;
                continue;
              }
              Err(err) => Err(format!("分析失败: {}", err)),
            };

            let mut stats = summary.lock().unwrap_or_else(|p| p.into_inner());
            match outcome {
              Ok(()) => stats.succeeded += 1,
              Err(message) => {
                error!("[{}] {}: {}", worker, frame.name(), message);
                stats.failed += 1;
              }
            }
          }
        });
      }
    });

    let summary = summary.into_inner().unwrap_or_else(|p| p.into_inner());
    info!(
      "批量任务结束: 成功 {}，失败 {}，取消 {}，耗时 {:.2?}",
      summary.succeeded,
      summary.failed,
      summary.cancelled,
      start.elapsed()
    );
    Ok(summary)
  }
}

impl<I, M, O> Task<I, M, O> for BatchTask
where
  I: Iterator<Item = ImageFrame> + Send,
  M: FrameAnalyzer + Sync,
  O: Render<ImageFrame, M::Output> + Sync,
  O::Error: std::fmt::Display,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    let summary = self.run_batch(input, &model, &output)?;
    if summary.failed > 0 {
      anyhow::bail!("{} 张图像处理失败", summary.failed);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::{
    convert::Infallible,
    sync::atomic::{AtomicUsize, Ordering},
  };

  use image::RgbImage;

  use super::*;

  struct Sizes;

  impl FrameAnalyzer for Sizes {
    type Output = u32;
    type Error = Infallible;

    fn analyze_frame(&self, frame: &ImageFrame, _: &CancelToken) -> Result<u32, Infallible> {
      Ok(frame.width() * frame.height())
    }
  }

  #[derive(Default)]
  struct Collect {
    total: AtomicUsize,
    count: AtomicUsize,
  }

  #[derive(Debug, thiserror::Error)]
  #[error("拒绝空图像")]
  struct Rejected;

  impl Render<ImageFrame, u32> for Collect {
    type Error = Rejected;

    fn render_result(&self, _frame: &ImageFrame, result: &u32) -> Result<(), Rejected> {
      if *result == 0 {
        return Err(Rejected);
      }
      self.total.fetch_add(*result as usize, Ordering::SeqCst);
      self.count.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  fn frames(sizes: &[u32]) -> Vec<ImageFrame> {
    sizes
      .iter()
      .enumerate()
      .map(|(i, s)| ImageFrame::new(format!("f{}", i), RgbImage::new(*s, *s)))
      .collect()
  }

  #[test]
  fn batch_processes_every_frame_and_isolates_failures() {
    let output = Collect::default();
    let summary = BatchTask::default()
      .with_workers(3)
      .run_batch(frames(&[1, 2, 0, 3, 4]).into_iter(), &Sizes, &output)
      .unwrap();
    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.failed, 1);
    assert_eq!(output.total.load(Ordering::SeqCst), 1 + 4 + 9 + 16);
  }

  #[test]
  fn cancelled_batch_does_nothing() {
    let output = Collect::default();
    let task = BatchTask::default().with_workers(2);
    task.cancel_token().cancel();
    let summary = task
      .run_batch(frames(&[1, 2]).into_iter(), &Sizes, &output)
      .unwrap();
    assert_eq!(summary, BatchSummary::default());
    assert_eq!(output.count.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn one_shot_uses_first_frame_only() {
    let output = Collect::default();
    OneShotTask
      .run_task(frames(&[2, 3]).into_iter(), Sizes, &output)
      .unwrap();
    assert_eq!(output.count.load(Ordering::SeqCst), 1);
    assert_eq!(output.total.load(Ordering::SeqCst), 4);
  }

  #[test]
  fn limit_caps_processed_frames() {
    let output = Collect::default();
    let summary = BatchTask::default()
      .with_limit(Some(2))
      .run_batch(frames(&[1, 1, 1]).into_iter(), &Sizes, &output)
      .unwrap();
    assert_eq!(summary.succeeded, 2);
  }
}
