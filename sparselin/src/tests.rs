//! sparselinのテストモジュール群
//!
//! モデル全体のスコア計算・更新・入出力の振る舞いを検証するテストを含みます。
//! 各コンポーネント単体のテストはそれぞれのモジュールにあります。

mod io;
